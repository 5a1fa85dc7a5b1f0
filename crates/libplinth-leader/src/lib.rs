//! Leader detection for plinth
//!
//! A [`Detector`] turns a boolean "am I the leader" [`Probe`] into a stream
//! of leadership [`Event`]s. [`FileProbe`] is the single-host probe: the
//! instance whose identity is written in a shared file is the leader.

pub mod detector;
pub mod error;
pub mod file;

pub use detector::{Detector, Event, EventStream, Probe, Status};
pub use error::LeaderError;
pub use file::{claim, current_leader, FileProbe};

/// Default poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
