//! Timed replay of CAN traffic over the LPA link.
//!
//! A [`Schedule`] lists frames with their cycle times. [`ReplayScheduler`]
//! sends them on a drift-corrected cadence and records each transmission in a
//! [`SendLog`]; a receiver running alongside hands every frame that comes
//! back to the [`Correlator`], which matches it to the nearest transmission
//! and checks port, identifier and payload. [`ReplaySession`] ties the two
//! together over one shared transport and returns a [`RunSummary`].
//!
//! [`LoopbackGateway`] plays the gateway's part for tests and bench setups.

pub mod clock;
pub mod config;
pub mod correlator;
pub mod error;
pub mod loopback;
pub mod schedule;
pub mod scheduler;
pub mod session;
pub mod summary;

pub use clock::{Clock, ManualClock, MonotonicClock, StopSignal};
pub use config::ReplayConfig;
pub use correlator::{
    Correlator, MismatchReason, ReceivedFrame, SendLog, SendRecord, ValidationResult,
};
pub use error::{ReplayError, Result};
pub use loopback::{GatewayStats, LoopbackGateway, PortMap};
pub use schedule::{parse_can_id, parse_payload, Cell, Schedule, ScheduleEntry, ScheduleRow, SkippedRow};
pub use scheduler::{pacing_delay, FrameSink, ReplayScheduler, SchedulerState};
pub use session::ReplaySession;
pub use summary::{LatencyStats, ReceiverStats, RunSummary, SenderStats};
