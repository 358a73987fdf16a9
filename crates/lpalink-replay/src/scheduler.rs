//! Drift-corrected replay of a schedule.
//!
//! Pacing tracks the cumulative intended elapsed time rather than each gap
//! on its own. After sending entry `i` the scheduler sleeps
//!
//! ```text
//! sleep = sum(cycle_time[0..=i]) - ((t_end - t_start) + (t_start - t0))
//! ```
//!
//! clamped at zero, so a slow send shortens the following waits instead of
//! pushing the rest of the run back.

use std::sync::Arc;
use std::time::Duration;

use lpalink_frame::LpaWriter;
use lpalink_transport::Transport;
use tracing::{debug, info, warn};

use crate::clock::{Clock, StopSignal};
use crate::correlator::{SendLog, SendRecord};
use crate::error::{ReplayError, Result};
use crate::schedule::{Schedule, ScheduleEntry};
use crate::summary::SenderStats;

/// Lifecycle of one replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    /// All entries sent; the receiver may still be catching up.
    Draining,
    Done,
}

/// Where the scheduler hands frames for transmission.
pub trait FrameSink {
    /// Transmit one entry. Returns once the transport accepted the frame.
    fn transmit(&mut self, entry: &ScheduleEntry) -> lpalink_frame::Result<()>;
}

impl<T: Transport> FrameSink for LpaWriter<T> {
    fn transmit(&mut self, entry: &ScheduleEntry) -> lpalink_frame::Result<()> {
        self.send(entry.port, entry.can_id, &entry.payload).map(|_| ())
    }
}

/// Time left to wait after a send so the schedule stays on its cumulative
/// track. Never negative.
pub fn pacing_delay(accumulated: Duration, send_duration: Duration, since_start: Duration) -> Duration {
    accumulated.saturating_sub(send_duration.saturating_add(since_start))
}

/// Sends schedule entries at their cycle times and logs every transmission.
#[derive(Debug)]
pub struct ReplayScheduler<C> {
    clock: C,
    log: Arc<SendLog>,
    stop: StopSignal,
    state: SchedulerState,
}

impl<C: Clock> ReplayScheduler<C> {
    pub fn new(clock: C, log: Arc<SendLog>, stop: StopSignal) -> Self {
        Self {
            clock,
            log,
            stop,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn log(&self) -> &Arc<SendLog> {
        &self.log
    }

    /// Send every entry in order.
    ///
    /// The first entry fixes `t0` and goes out immediately. The stop signal
    /// is checked before each entry; stopping moves straight to `Done`,
    /// finishing moves to `Draining`. Entries that cannot be assembled are
    /// counted and skipped without disturbing the cadence. Link failures end
    /// the run with an error.
    pub fn run<S: FrameSink>(&mut self, schedule: &Schedule, sink: &mut S) -> Result<SenderStats> {
        if self.state != SchedulerState::Idle {
            return Err(ReplayError::InvalidState {
                expected: SchedulerState::Idle,
                actual: self.state,
            });
        }
        self.transition(SchedulerState::Running);

        let mut stats = SenderStats::default();
        let mut t0: Option<u64> = None;
        let mut accumulated = Duration::ZERO;
        let total = schedule.len();

        for (position, entry) in schedule.iter().enumerate() {
            if self.stop.is_stopped() {
                info!(sent = stats.sent, remaining = total - position, "replay stopped");
                stats.stopped = true;
                break;
            }

            let t_start = self.clock.now_ns();
            let origin = *t0.get_or_insert(t_start);

            let outcome = sink.transmit(entry);
            let t_end = self.clock.now_ns();
            match outcome {
                Ok(()) => {
                    let record = SendRecord {
                        sequence_index: self.log.next_index(),
                        send_timestamp_ns: t_end,
                        can_id: entry.can_id,
                        port: entry.port,
                        payload: entry.payload.clone(),
                        expected_dest_port: entry.dest_port,
                        expected_can_id: entry.expected_can_id,
                        expected_payload: entry.expected_payload.clone(),
                        label: entry.label.clone(),
                    };
                    debug!(
                        index = record.sequence_index,
                        port = entry.port,
                        can_id = entry.can_id,
                        send_ns = t_end.saturating_sub(t_start),
                        "frame sent"
                    );
                    self.log.append(record);
                    stats.sent += 1;
                }
                Err(err) if err.is_fatal() => {
                    warn!(error = %err, position, "transport failed during replay");
                    self.transition(SchedulerState::Done);
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(error = %err, position, label = %entry.label, "skipping entry");
                    stats.send_failures += 1;
                }
            }

            accumulated += entry.cycle_time;
            let delay = pacing_delay(
                accumulated,
                Duration::from_nanos(t_end.saturating_sub(t_start)),
                Duration::from_nanos(t_start.saturating_sub(origin)),
            );
            self.clock.sleep(delay);
        }

        self.transition(if stats.stopped {
            SchedulerState::Done
        } else {
            SchedulerState::Draining
        });
        Ok(stats)
    }

    /// Leave `Draining` once the receiver is done.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            SchedulerState::Draining | SchedulerState::Done => {
                self.transition(SchedulerState::Done);
                Ok(())
            }
            actual => Err(ReplayError::InvalidState {
                expected: SchedulerState::Draining,
                actual,
            }),
        }
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "scheduler state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use lpalink_frame::FrameError;

    use super::*;
    use crate::clock::ManualClock;

    /// Sink that takes a scripted amount of clock time per send.
    struct TimedSink<'a> {
        clock: &'a ManualClock,
        costs: VecDeque<Duration>,
        sent: Vec<u32>,
        fail_with: Option<fn() -> FrameError>,
    }

    impl<'a> TimedSink<'a> {
        fn new(clock: &'a ManualClock, costs: &[u64]) -> Self {
            Self {
                clock,
                costs: costs.iter().map(|ms| Duration::from_millis(*ms)).collect(),
                sent: Vec::new(),
                fail_with: None,
            }
        }
    }

    impl FrameSink for TimedSink<'_> {
        fn transmit(&mut self, entry: &ScheduleEntry) -> lpalink_frame::Result<()> {
            if let Some(cost) = self.costs.pop_front() {
                self.clock.advance(cost);
            }
            if let Some(make) = self.fail_with {
                return Err(make());
            }
            self.sent.push(entry.can_id);
            Ok(())
        }
    }

    fn schedule(cycles_ms: &[u64]) -> Schedule {
        Schedule::from_entries(
            cycles_ms
                .iter()
                .enumerate()
                .map(|(i, ms)| {
                    ScheduleEntry::new(1, 0x100 + i as u32, vec![i as u8], Duration::from_millis(*ms))
                })
                .collect(),
        )
    }

    #[test]
    fn pacing_delay_clamps_at_zero() {
        let ms = Duration::from_millis;
        assert_eq!(pacing_delay(ms(10), ms(2), ms(0)), ms(8));
        assert_eq!(pacing_delay(ms(10), ms(20), ms(0)), Duration::ZERO);
        assert_eq!(pacing_delay(ms(30), ms(1), ms(20)), ms(9));
    }

    #[test]
    fn steady_sends_keep_the_cycle() {
        let clock = ManualClock::new();
        let log = Arc::new(SendLog::new());
        let mut scheduler = ReplayScheduler::new(&clock, Arc::clone(&log), StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[0, 0, 0]);

        let stats = scheduler.run(&schedule(&[10, 10, 10]), &mut sink).unwrap();
        assert_eq!(stats.sent, 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10); 3]);

        let stamps: Vec<u64> = log.records().iter().map(|r| r.send_timestamp_ns).collect();
        assert_eq!(stamps, vec![0, 10_000_000, 20_000_000]);
    }

    #[test]
    fn slow_first_send_shortens_following_sleeps() {
        let clock = ManualClock::new();
        let log = Arc::new(SendLog::new());
        let mut scheduler = ReplayScheduler::new(&clock, Arc::clone(&log), StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[20, 0, 0]);

        scheduler.run(&schedule(&[10, 10, 10]), &mut sink).unwrap();

        let sleeps = clock.sleeps();
        assert_eq!(sleeps[0], Duration::ZERO);
        assert_eq!(sleeps[1], Duration::ZERO);
        assert_eq!(sleeps[2], Duration::from_millis(10));
        // Back on the cumulative track after three entries.
        assert_eq!(clock.now_ns(), 30_000_000);
    }

    #[test]
    fn slow_middle_send_is_absorbed() {
        let clock = ManualClock::new();
        let log = Arc::new(SendLog::new());
        let mut scheduler = ReplayScheduler::new(&clock, log, StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[1, 4, 1]);

        scheduler.run(&schedule(&[10, 10, 10]), &mut sink).unwrap();
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(9),
                Duration::from_millis(6),
                Duration::from_millis(9)
            ]
        );
    }

    #[test]
    fn records_are_sequenced_in_send_order() {
        let clock = ManualClock::new();
        let log = Arc::new(SendLog::new());
        let mut scheduler = ReplayScheduler::new(&clock, Arc::clone(&log), StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[]);

        scheduler.run(&schedule(&[1, 1, 1, 1]), &mut sink).unwrap();
        let records = log.records();
        assert_eq!(sink.sent, vec![0x100, 0x101, 0x102, 0x103]);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.sequence_index, i as u64);
            assert_eq!(record.can_id, 0x100 + i as u32);
        }
        assert_eq!(scheduler.state(), SchedulerState::Draining);
        scheduler.finish().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[test]
    fn stop_signal_skips_remaining_entries() {
        let clock = ManualClock::new();
        let stop = StopSignal::new();
        let log = Arc::new(SendLog::new());
        let mut scheduler = ReplayScheduler::new(&clock, Arc::clone(&log), stop.clone());

        struct StopAfterFirst<'a>(&'a StopSignal, usize);
        impl FrameSink for StopAfterFirst<'_> {
            fn transmit(&mut self, _entry: &ScheduleEntry) -> lpalink_frame::Result<()> {
                self.1 += 1;
                self.0.stop();
                Ok(())
            }
        }

        let mut sink = StopAfterFirst(&stop, 0);
        let stats = scheduler.run(&schedule(&[5, 5, 5]), &mut sink).unwrap();
        assert_eq!(sink.1, 1);
        assert_eq!(stats.sent, 1);
        assert!(stats.stopped);
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[test]
    fn link_failure_aborts() {
        let clock = ManualClock::new();
        let mut scheduler =
            ReplayScheduler::new(&clock, Arc::new(SendLog::new()), StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[]);
        sink.fail_with = Some(|| FrameError::ConnectionClosed);

        let err = scheduler.run(&schedule(&[1, 1]), &mut sink).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(scheduler.state(), SchedulerState::Done);
    }

    #[test]
    fn assembly_failure_is_skipped() {
        let clock = ManualClock::new();
        let log = Arc::new(SendLog::new());
        let mut scheduler = ReplayScheduler::new(&clock, Arc::clone(&log), StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[]);
        sink.fail_with = Some(|| FrameError::InvalidLength { len: 70_000, max: 0xFFFF });

        let stats = scheduler.run(&schedule(&[2, 2]), &mut sink).unwrap();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.send_failures, 2);
        assert!(log.is_empty());
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(2); 2]);
    }

    #[test]
    fn run_twice_is_rejected() {
        let clock = ManualClock::new();
        let mut scheduler =
            ReplayScheduler::new(&clock, Arc::new(SendLog::new()), StopSignal::new());
        let mut sink = TimedSink::new(&clock, &[]);
        scheduler.run(&schedule(&[1]), &mut sink).unwrap();

        let err = scheduler.run(&schedule(&[1]), &mut sink).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::InvalidState {
                expected: SchedulerState::Idle,
                actual: SchedulerState::Draining
            }
        ));
    }

    #[test]
    fn finish_before_run_is_rejected() {
        let clock = ManualClock::new();
        let mut scheduler =
            ReplayScheduler::new(&clock, Arc::new(SendLog::new()), StopSignal::new());
        assert!(scheduler.finish().is_err());
    }
}
