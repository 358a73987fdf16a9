use std::sync::Arc;

use lpalink_transport::{SharedTransport, Transport};
use tracing::debug;

use crate::command::CMD_AP_TEST;
use crate::error::{transport_to_frame_error, Result};
use crate::lpa::{assemble_with, TxOptions};

/// Writes complete LPA frames to a shared transport.
///
/// Each frame goes out in one locked `write_all`, so a concurrent reader
/// never sees half of it interleaved with another write.
#[derive(Debug)]
pub struct LpaWriter<T> {
    transport: Arc<SharedTransport<T>>,
    cmd: u16,
    options: TxOptions,
}

impl<T: Transport> LpaWriter<T> {
    /// Create a writer that sends `CMD_AP_TEST` frames with default flags.
    pub fn new(transport: Arc<SharedTransport<T>>) -> Self {
        Self::with_options(transport, CMD_AP_TEST, TxOptions::default())
    }

    /// Create a writer with an explicit command and descriptor flags.
    pub fn with_options(transport: Arc<SharedTransport<T>>, cmd: u16, options: TxOptions) -> Self {
        Self {
            transport,
            cmd,
            options,
        }
    }

    /// Assemble and send one CAN frame, returning the wire size.
    pub fn send(&self, port: u16, can_id: u32, payload: &[u8]) -> Result<usize> {
        let frame = assemble_with(payload, can_id, false, self.cmd, port, self.options)?;
        self.write_raw(&frame)?;
        debug!(port, can_id, len = payload.len(), "sent lpa frame");
        Ok(frame.len())
    }

    /// Write pre-built wire bytes.
    pub fn write_raw(&self, frame: &[u8]) -> Result<()> {
        self.transport
            .write_all(frame)
            .map_err(transport_to_frame_error)
    }

    /// Command code placed in `field1`.
    pub fn cmd(&self) -> u16 {
        self.cmd
    }

    /// Descriptor flags applied to every frame.
    pub fn options(&self) -> TxOptions {
        self.options
    }

    /// Borrow the shared transport.
    pub fn transport(&self) -> &Arc<SharedTransport<T>> {
        &self.transport
    }
}
