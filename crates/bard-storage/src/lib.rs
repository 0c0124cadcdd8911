//! # Bard Storage
//!
//! Ordered, immutable logs of heap call events and their versioned binary
//! encoding.
//!
//! ## Features
//!
//! - **Build once**: [`EventLogBuilder`] appends in capture order, then
//!   freezes into an [`EventLog`] that can be shared across threads
//! - **Versioned format**: big-endian framing with a `major.minor` header;
//!   any minor of the current major is readable
//! - **Forward compatible payloads**: unknown payload tails survive a
//!   decode/encode round trip
//! - **Files**: atomic [`write_log`] and [`read_log`] on tokio

pub mod error;
pub mod event_log;
pub mod file;

pub use error::LogError;
pub use event_log::{EventLog, EventLogBuilder, FormatVersion, LoggedEvent};
pub use file::{read_log, write_log};
