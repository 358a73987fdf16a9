//! Byte-stream transport abstraction for the LPA link.
//!
//! The framing layers above never assume message boundaries. Everything they
//! need from a transport is captured by the [`Transport`] trait:
//! - `write` / `read` of raw bytes
//! - `wait_readable` / `wait_writable` with an optional timeout
//! - `close`
//!
//! [`Endpoint`] implements it for IPC character devices and Unix domain
//! sockets, in blocking or non-blocking mode. [`SharedTransport`] serializes
//! every read and write call through a single lock so a sender and a receiver
//! can share one endpoint. Waiting for data or buffer space happens outside
//! that lock.

#[cfg(unix)]
pub mod endpoint;
pub mod error;
pub mod shared;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use shared::SharedTransport;
#[cfg(unix)]
pub use endpoint::Endpoint;
pub use traits::{IoMode, Transport, TransportConfig, WRITE_BACKOFF};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
