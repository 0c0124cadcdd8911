//! # Bard Story
//!
//! Replays recorded heap call logs against a [`Backdrop`](bard_core::Backdrop).
//!
//! A [`StoryTeller`] owns a shared [`EventLog`](bard_storage::EventLog), picks
//! a play order that honors the data dependencies between events, plays every
//! event and reports each outcome to a [`StatsSink`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bard_core::SimulatedBackdrop;
//! use bard_story::{PlayOrder, StatsCollector, StoryTeller, synth};
//!
//! let log = Arc::new(synth::synthesize(Default::default()));
//! let stats = StatsCollector::new();
//!
//! let mut teller = StoryTeller::new(log);
//! let report = teller.run(
//!     &PlayOrder::Shuffled { seed: 7 },
//!     &mut SimulatedBackdrop::new(),
//!     &stats,
//! )?;
//! println!("{} events, {} failed", report.played, report.failed);
//! ```

pub mod config;
pub mod dependency;
pub mod error;
pub mod order;
pub mod stats;
pub mod synth;
pub mod teller;

pub use config::{FailurePolicy, StoryConfig};
pub use dependency::{DependencyGraph, TieBreak};
pub use error::StoryError;
pub use order::PlayOrder;
pub use stats::{KindStats, Outcome, StatsCollector, StatsSink, StatsSnapshot};
pub use synth::{SynthConfig, TraceSynthesizer};
pub use teller::{AbortReason, CancelHandle, RunReport, StoryState, StoryTeller};
