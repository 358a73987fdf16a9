//! Gateway emulator that answers every transmitted frame with a received one.
//!
//! Each TX frame read from the link is echoed back as an RX frame carrying
//! the same identifier, flags and payload, stamped with the gateway's clock
//! and routed to the destination port its [`PortMap`] assigns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lpalink_frame::{
    assemble_rx, disassemble_tx, CanHeaderRx, Envelope, EnvelopeReader, FrameConfig, FrameError,
    LpaWriter,
};
use lpalink_transport::{SharedTransport, Transport};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::{Clock, MonotonicClock, StopSignal};
use crate::error::{ReplayError, Result};

/// Source port to destination port routing. Unrouted ports map to
/// themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMap {
    routes: HashMap<u16, u16>,
}

impl PortMap {
    pub fn identity() -> Self {
        Self::default()
    }

    /// Route frames sent on `from` to `to`.
    pub fn with_route(mut self, from: u16, to: u16) -> Self {
        self.routes.insert(from, to);
        self
    }

    pub fn resolve(&self, port: u16) -> u16 {
        self.routes.get(&port).copied().unwrap_or(port)
    }
}

/// Counters for one gateway connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Frames answered.
    pub forwarded: u64,
    /// Frames read but not answered (bad CRC or not a TX frame).
    pub rejected: u64,
}

pub struct LoopbackGateway<T, C = MonotonicClock> {
    writer: LpaWriter<T>,
    ports: PortMap,
    frame: FrameConfig,
    clock: C,
    poll_interval: Duration,
}

impl<T: Transport> LoopbackGateway<T> {
    pub fn new(transport: Arc<SharedTransport<T>>, ports: PortMap) -> Self {
        Self {
            writer: LpaWriter::new(transport),
            ports,
            frame: FrameConfig::default(),
            clock: MonotonicClock::new(),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl<T: Transport, C: Clock> LoopbackGateway<T, C> {
    /// Stamp RX descriptors from a different clock.
    pub fn with_clock<D: Clock>(self, clock: D) -> LoopbackGateway<T, D> {
        LoopbackGateway {
            writer: self.writer,
            ports: self.ports,
            frame: self.frame,
            clock,
            poll_interval: self.poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn ports(&self) -> &PortMap {
        &self.ports
    }

    /// Build the RX frame answering one TX envelope.
    pub fn respond(&self, envelope: &Envelope) -> Result<Bytes> {
        let lpa = disassemble_tx(&envelope.raw)?;
        let tx = lpa.tx_header()?;
        let dest = self.ports.resolve(lpa.port);
        let source_port =
            u8::try_from(dest).map_err(|_| ReplayError::PortOutOfRange { port: dest })?;
        let header = CanHeaderRx::from_tx(&tx, source_port, self.clock.now_ns());
        Ok(assemble_rx(&header, &lpa.payload, lpa.cmd, dest)?)
    }

    /// Answer frames until stopped, until `limit` frames were answered, or
    /// until the peer closes the link.
    pub fn serve(&self, stop: &StopSignal, limit: Option<u64>) -> Result<GatewayStats> {
        let mut reader =
            EnvelopeReader::with_config(Arc::clone(self.writer.transport()), self.frame.clone());
        let mut stats = GatewayStats::default();
        info!(?limit, "gateway serving");

        while !stop.is_stopped() && limit.map_or(true, |limit| stats.forwarded < limit) {
            let frames = match reader
                .wait_readable(Some(self.poll_interval))
                .and_then(|ready| if ready { reader.poll_frames() } else { Ok(Vec::new()) })
            {
                Ok(frames) => frames,
                Err(FrameError::ConnectionClosed) => {
                    info!("peer closed the link");
                    break;
                }
                Err(err) => return Err(err.into()),
            };

            for envelope in frames {
                if limit.is_some_and(|limit| stats.forwarded >= limit) {
                    break;
                }
                if let Err(err) = envelope.verify_crc() {
                    stats.rejected += 1;
                    warn!(error = %err, "frame dropped");
                    continue;
                }
                match self.respond(&envelope) {
                    Ok(reply) => {
                        self.writer.write_raw(&reply)?;
                        stats.forwarded += 1;
                        debug!(port = envelope.field2, len = reply.len(), "frame answered");
                    }
                    Err(err) => {
                        stats.rejected += 1;
                        warn!(error = %err, "frame not answered");
                    }
                }
            }
        }

        info!(
            forwarded = stats.forwarded,
            rejected = stats.rejected,
            "gateway finished"
        );
        Ok(stats)
    }
}
