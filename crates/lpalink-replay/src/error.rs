use std::path::PathBuf;

use crate::scheduler::SchedulerState;

/// Errors that can occur while loading or running a replay.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] lpalink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] lpalink_frame::FrameError),

    /// A schedule row could not be turned into an entry.
    #[error("schedule row {row}: {reason}")]
    InvalidEntry { row: usize, reason: String },

    /// The schedule file could not be read.
    #[error("failed to read schedule {path}: {source}")]
    Schedule {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A port does not fit the 8-bit source port of an RX descriptor.
    #[error("port {port} does not fit the 8-bit source port field")]
    PortOutOfRange { port: u16 },

    /// An operation was attempted in the wrong scheduler state.
    #[error("scheduler is {actual:?}, expected {expected:?}")]
    InvalidState {
        expected: SchedulerState,
        actual: SchedulerState,
    },
}

impl ReplayError {
    /// True when the link is gone and the run cannot continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            ReplayError::Transport(_) => true,
            ReplayError::Frame(err) => err.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReplayError>;
