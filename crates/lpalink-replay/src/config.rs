use std::time::Duration;

use lpalink_frame::{FrameConfig, TxOptions, CMD_AP_TEST};

/// Configuration for a replay session.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Command placed in `field1` of every transmitted frame.
    pub command: u16,
    /// Set the timestamp-enable bit in TX descriptors.
    pub timestamp_enable: bool,
    /// Send CAN FD frames.
    pub fd: bool,
    /// Request bit-rate switching (FD only).
    pub brs: bool,
    /// How long the receiver waits for readability per loop iteration.
    pub poll_interval: Duration,
    /// Pause after a read that produced no frame.
    pub idle_delay: Duration,
    /// Head start given to the receiver before the first send.
    pub receiver_warmup: Duration,
    /// How long the receiver keeps listening after the last send.
    pub drain_timeout: Duration,
    /// End the drain early once every sent frame has a passing match.
    pub stop_when_matched: bool,
    /// Envelope scanning limits for the receiver.
    pub frame: FrameConfig,
}

impl ReplayConfig {
    /// Descriptor flags for transmitted frames.
    pub fn tx_options(&self) -> TxOptions {
        TxOptions {
            timestamp_enable: self.timestamp_enable,
            fd: self.fd,
            brs: self.brs,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            command: CMD_AP_TEST,
            timestamp_enable: false,
            fd: false,
            brs: false,
            poll_interval: Duration::from_millis(10),
            idle_delay: Duration::from_millis(1),
            receiver_warmup: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(1),
            stop_when_matched: true,
            frame: FrameConfig::default(),
        }
    }
}
