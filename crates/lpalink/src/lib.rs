//! CAN frame replay and validation over the LPA IPC link.
//!
//! The link carries CRC-protected envelopes between an application processor
//! and a CAN gateway. This crate bundles the layers that speak it.
//!
//! # Crate Structure
//!
//! - [`transport`]: IPC device and Unix socket endpoints
//! - [`frame`]: envelope codec, CAN descriptors, LPA frames
//! - [`replay`]: scheduled replay with receive-side validation (behind the
//!   `replay` feature)

/// Re-export transport types.
pub mod transport {
    pub use lpalink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lpalink_frame::*;
}

/// Re-export replay types (requires `replay` feature).
#[cfg(feature = "replay")]
pub mod replay {
    pub use lpalink_replay::*;
}
