/// Errors that can occur while building or parsing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame does not start with `FF 55 AA`.
    #[error("invalid envelope magic (expected FF 55 AA)")]
    BadMagic,

    /// The buffer is smaller than the minimum size for this frame kind.
    #[error("frame too short ({len} bytes, min {min})")]
    TooShort { len: usize, min: usize },

    /// The declared length runs past the end of the buffer.
    #[error("truncated frame (declared payload {declared} bytes, {available} available)")]
    Truncated { declared: usize, available: usize },

    /// The payload length does not fit the 16-bit length field or the configured limit.
    #[error("invalid payload length ({len} bytes, max {max})")]
    InvalidLength { len: usize, max: usize },

    /// The CRC trailer does not match the frame contents.
    #[error("crc mismatch (trailer 0x{expected:04X}, computed 0x{actual:04X})")]
    CrcMismatch { expected: u16, actual: u16 },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport failed underneath the frame layer.
    #[error("transport error: {0}")]
    Transport(#[from] lpalink_transport::TransportError),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl FrameError {
    /// Bad magic or truncation: the candidate is not a well-formed envelope.
    pub fn is_malformed(&self) -> bool {
        matches!(self, FrameError::BadMagic | FrameError::Truncated { .. })
    }

    /// The link itself failed; nothing more can be sent or received.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FrameError::Io(_) | FrameError::Transport(_) | FrameError::ConnectionClosed
        )
    }
}

/// Map a transport failure, reporting a closed stream as `ConnectionClosed`.
pub(crate) fn transport_to_frame_error(err: lpalink_transport::TransportError) -> FrameError {
    match err {
        lpalink_transport::TransportError::Closed => FrameError::ConnectionClosed,
        other => FrameError::Transport(other),
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
