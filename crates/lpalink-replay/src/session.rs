//! A replay run: one sender and one receiver sharing a transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lpalink_frame::{disassemble, Envelope, EnvelopeReader, LpaWriter};
use lpalink_transport::{SharedTransport, Transport};
use tracing::{debug, info, warn};

use crate::clock::{duration_ns, Clock, MonotonicClock, StopSignal};
use crate::config::ReplayConfig;
use crate::correlator::{Correlator, MismatchReason, ReceivedFrame, SendLog};
use crate::error::{ReplayError, Result};
use crate::schedule::{Schedule, SkippedRow};
use crate::scheduler::ReplayScheduler;
use crate::summary::{ReceiverStats, RunSummary};

const SENDER_RUNNING: u64 = u64::MAX;

/// Replays a schedule over a transport and validates what comes back.
///
/// The receiver starts first and gets `receiver_warmup` before the first
/// send. After the last send it keeps listening for up to `drain_timeout`.
/// A transport failure on either side stops both and is returned as the
/// run's error; every other problem is counted in the summary.
pub struct ReplaySession<T, C = MonotonicClock> {
    transport: Arc<SharedTransport<T>>,
    schedule: Schedule,
    skipped: Vec<SkippedRow>,
    config: ReplayConfig,
    clock: C,
    stop: StopSignal,
}

impl<T: Transport> ReplaySession<T> {
    pub fn new(transport: Arc<SharedTransport<T>>, schedule: Schedule, config: ReplayConfig) -> Self {
        Self {
            transport,
            schedule,
            skipped: Vec::new(),
            config,
            clock: MonotonicClock::new(),
            stop: StopSignal::new(),
        }
    }
}

impl<T: Transport, C: Clock> ReplaySession<T, C> {
    /// Use a different clock for pacing and timestamps.
    pub fn with_clock<D: Clock>(self, clock: D) -> ReplaySession<T, D> {
        ReplaySession {
            transport: self.transport,
            schedule: self.schedule,
            skipped: self.skipped,
            config: self.config,
            clock,
            stop: self.stop,
        }
    }

    /// Rows dropped while loading the schedule, carried into the summary.
    pub fn with_skipped(mut self, skipped: Vec<SkippedRow>) -> Self {
        self.skipped = skipped;
        self
    }

    /// Handle for stopping the run from another thread.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    /// Run the schedule to completion.
    pub fn run(&self) -> Result<RunSummary> {
        let log = Arc::new(SendLog::new());
        let correlator = Correlator::new(Arc::clone(&log));
        let sender_done_at = AtomicU64::new(SENDER_RUNNING);

        info!(entries = self.schedule.len(), "replay starting");

        let (sent, received) = std::thread::scope(|scope| {
            let receiver = scope.spawn(|| {
                ReceiveLoop::new(self, &correlator, &sender_done_at).run()
            });

            self.clock.sleep(self.config.receiver_warmup);

            let mut scheduler =
                ReplayScheduler::new(&self.clock, Arc::clone(&log), self.stop.clone());
            let mut writer = LpaWriter::with_options(
                Arc::clone(&self.transport),
                self.config.command,
                self.config.tx_options(),
            );
            let sent = scheduler.run(&self.schedule, &mut writer);
            if sent.is_err() {
                self.stop.stop();
            }
            sender_done_at.store(self.clock.now_ns(), Ordering::SeqCst);

            let received = receiver
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload));
            if let Err(err) = scheduler.finish() {
                debug!(error = %err, "scheduler already finished");
            }
            (sent, received)
        });

        let sender = sent?;
        let receiver = received?;
        let matched = correlator.matched_count() as u64;
        let summary = RunSummary::new(
            sender,
            receiver,
            matched,
            self.skipped.clone(),
            correlator.into_results(),
        );
        info!(
            sent = summary.sent,
            received = summary.received_frames,
            passed = summary.passed,
            failed = summary.failed,
            unmatched = summary.unmatched,
            "replay finished"
        );
        Ok(summary)
    }
}

struct ReceiveLoop<'a, T, C> {
    reader: EnvelopeReader<T>,
    correlator: &'a Correlator,
    clock: &'a C,
    config: &'a ReplayConfig,
    stop: &'a StopSignal,
    sender_done_at: &'a AtomicU64,
    stats: ReceiverStats,
    // Frames without a match yet, with the log length seen when they arrived.
    deferred: Vec<(ReceivedFrame, usize)>,
}

impl<'a, T: Transport, C: Clock> ReceiveLoop<'a, T, C> {
    fn new(
        session: &'a ReplaySession<T, C>,
        correlator: &'a Correlator,
        sender_done_at: &'a AtomicU64,
    ) -> Self {
        Self {
            reader: EnvelopeReader::with_config(
                Arc::clone(&session.transport),
                session.config.frame.clone(),
            ),
            correlator,
            clock: &session.clock,
            config: &session.config,
            stop: &session.stop,
            sender_done_at,
            stats: ReceiverStats::default(),
            deferred: Vec::new(),
        }
    }

    fn run(mut self) -> Result<ReceiverStats> {
        debug!("receiver started");
        loop {
            self.retry_deferred();
            if self.stop.is_stopped() || self.drain_complete() {
                break;
            }

            match self.reader.wait_readable(Some(self.config.poll_interval)) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => return Err(self.fail(err.into())),
            }

            let frames = match self.reader.poll_frames() {
                Ok(frames) => frames,
                Err(err) => return Err(self.fail(err.into())),
            };
            let received_at = self.clock.now_ns();
            let log_len = self.correlator.log().len();

            if frames.is_empty() {
                self.clock.sleep(self.config.idle_delay);
                continue;
            }
            for envelope in frames {
                self.handle(envelope, received_at, log_len);
            }
        }

        for (frame, _) in std::mem::take(&mut self.deferred) {
            self.correlator.record(self.correlator.correlate(&frame));
        }
        self.stats.malformed_frames += self.reader.oversized();
        debug!(stats = ?self.stats, "receiver finished");
        Ok(self.stats)
    }

    fn handle(&mut self, envelope: Envelope, received_at: u64, log_len: usize) {
        self.stats.received_frames += 1;

        if let Err(err) = envelope.verify_crc() {
            self.stats.crc_failures += 1;
            warn!(
                cmd = envelope.field1,
                port = envelope.field2,
                error = %err,
                "frame discarded"
            );
            return;
        }

        let parsed = disassemble(&envelope.raw)
            .and_then(|lpa| lpa.rx_header().map(|header| (lpa, header)));
        let (lpa, header) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                self.stats.malformed_frames += 1;
                warn!(error = %err, len = envelope.raw.len(), "malformed lpa frame");
                return;
            }
        };

        let frame = ReceivedFrame {
            port: u16::from(header.source_port),
            can_id: header.resolved_can_id(),
            payload: lpa.payload.to_vec(),
            receive_timestamp_ns: received_at,
            device_timestamp_ns: header.timestamp_ns(),
        };
        debug!(
            port = frame.port,
            can_id = frame.can_id,
            len = frame.payload.len(),
            "frame received"
        );

        let result = self.correlator.correlate(&frame);
        if result.reason == Some(MismatchReason::NoMatch) && !self.sender_done() {
            self.deferred.push((frame, log_len));
        } else {
            self.correlator.record(result);
        }
    }

    // A frame can arrive before the sender has logged the write that produced
    // it. That write is at most the next record, so once the log has grown
    // past the length seen on arrival the verdict is final.
    fn retry_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let log_len = self.correlator.log().len();
        let sender_done = self.sender_done();
        let correlator = self.correlator;
        self.deferred.retain(|(frame, seen)| {
            if log_len > *seen || sender_done {
                correlator.record(correlator.correlate(frame));
                false
            } else {
                true
            }
        });
    }

    fn sender_done(&self) -> bool {
        self.sender_done_at.load(Ordering::SeqCst) != SENDER_RUNNING
    }

    fn drain_complete(&self) -> bool {
        let done_at = self.sender_done_at.load(Ordering::SeqCst);
        if done_at == SENDER_RUNNING {
            return false;
        }
        if self.config.stop_when_matched
            && self.deferred.is_empty()
            && self.correlator.matched_count() >= self.correlator.log().len()
        {
            debug!("every transmission matched, ending drain");
            return true;
        }
        self.clock.now_ns() >= done_at.saturating_add(duration_ns(self.config.drain_timeout))
    }

    fn fail(&self, err: ReplayError) -> ReplayError {
        warn!(error = %err, "receiver stopped by transport failure");
        self.stop.stop();
        err
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::time::Duration;

    use lpalink_frame::{assemble_rx, CanHeaderRx, CMD_AP_TEST};
    use lpalink_transport::{Endpoint, TransportConfig};

    use super::*;
    use crate::loopback::{LoopbackGateway, PortMap};
    use crate::schedule::ScheduleEntry;

    fn shared(stream: UnixStream) -> Arc<SharedTransport<Endpoint>> {
        Arc::new(SharedTransport::new(
            Endpoint::from_unix(stream, TransportConfig::non_blocking()).unwrap(),
        ))
    }

    fn quick_config() -> ReplayConfig {
        ReplayConfig {
            receiver_warmup: Duration::from_millis(5),
            drain_timeout: Duration::from_millis(100),
            ..ReplayConfig::default()
        }
    }

    #[test]
    fn unanswered_frames_are_unmatched() {
        let (left, _right) = UnixStream::pair().unwrap();
        let schedule = Schedule::from_entries(vec![
            ScheduleEntry::new(1, 0x100, vec![1], Duration::from_millis(1)),
            ScheduleEntry::new(1, 0x101, vec![2], Duration::from_millis(1)),
        ]);
        let session = ReplaySession::new(shared(left), schedule, quick_config());

        let summary = session.run().unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.received_frames, 0);
        assert_eq!(summary.unmatched, 2);
        assert!(!summary.is_success());
    }

    #[test]
    fn stop_before_run_sends_nothing() {
        let (left, _right) = UnixStream::pair().unwrap();
        let schedule = Schedule::from_entries(vec![ScheduleEntry::new(
            1,
            0x100,
            vec![1],
            Duration::from_millis(1),
        )]);
        let session = ReplaySession::new(shared(left), schedule, quick_config());
        session.stop_signal().stop();

        let summary = session.run().unwrap();
        assert_eq!(summary.sent, 0);
        assert!(summary.stopped);
    }

    #[test]
    fn unsolicited_and_corrupt_frames_are_counted() {
        let (left, right) = UnixStream::pair().unwrap();
        let peer = shared(right);

        let good = assemble_rx(&CanHeaderRx::can(1, 0x7AA, 0), b"zz", CMD_AP_TEST, 1).unwrap();
        let mut corrupt = good.to_vec();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;
        let short = lpalink_frame::build(CMD_AP_TEST, 1, &[0u8; 6]).unwrap();

        let mut wire = good.to_vec();
        wire.extend_from_slice(&corrupt);
        wire.extend_from_slice(&short);
        peer.write_all(&wire).unwrap();

        let config = ReplayConfig {
            stop_when_matched: false,
            ..quick_config()
        };
        let session = ReplaySession::new(shared(left), Schedule::default(), config);
        let summary = session.run().unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.received_frames, 3);
        assert_eq!(summary.crc_failures, 1);
        assert_eq!(summary.malformed_frames, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].reason, Some(MismatchReason::NoMatch));
    }

    #[test]
    fn back_to_back_frames_survive_full_socket_buffers() {
        let (left, right) = UnixStream::pair().unwrap();
        let gateway_stop = StopSignal::new();
        let gateway = {
            let stop = gateway_stop.clone();
            let transport = shared(right);
            std::thread::spawn(move || {
                LoopbackGateway::new(transport, PortMap::identity())
                    .with_poll_interval(Duration::from_millis(1))
                    .serve(&stop, None)
            })
        };

        let count = 3_000u32;
        let schedule = Schedule::from_entries(
            (0..count)
                .map(|i| {
                    let payload = [(i >> 8) as u8, i as u8, 0xA5, 0x5A, 0, 1, 2, 3];
                    ScheduleEntry::new(1 + (i % 4) as u16, i, payload.to_vec(), Duration::ZERO)
                })
                .collect(),
        );
        let config = ReplayConfig {
            drain_timeout: Duration::from_secs(10),
            ..quick_config()
        };

        let (tx, rx) = std::sync::mpsc::channel();
        let transport = shared(left);
        std::thread::spawn(move || {
            let _ = tx.send(ReplaySession::new(transport, schedule, config).run());
        });
        let summary = rx
            .recv_timeout(Duration::from_secs(30))
            .expect("replay stalled")
            .unwrap();

        gateway_stop.stop();
        let stats = gateway.join().unwrap().unwrap();

        assert_eq!(summary.sent, u64::from(count));
        assert_eq!(summary.received_frames, u64::from(count));
        assert_eq!(summary.passed, u64::from(count));
        assert_eq!(summary.unmatched, 0);
        assert_eq!(stats.forwarded, u64::from(count));
    }

    #[test]
    fn closed_peer_is_fatal() {
        let (left, right) = UnixStream::pair().unwrap();
        drop(right);
        let schedule = Schedule::from_entries(vec![ScheduleEntry::new(
            1,
            0x100,
            vec![1],
            Duration::from_millis(1),
        )]);
        let session = ReplaySession::new(shared(left), schedule, quick_config());

        let err = session.run().unwrap_err();
        assert!(err.is_fatal());
    }
}
