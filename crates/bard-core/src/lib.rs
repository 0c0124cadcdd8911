//! # Bard Core
//!
//! Event model for recording and replaying heap allocator call traces.
//!
//! A capture layer turns every heap API call of a process into an
//! [`Event`]. Events can later be played against any allocator that
//! implements [`Backdrop`], in capture order or reordered, to validate or
//! benchmark that allocator.
//!
//! ## Key Types
//!
//! - [`EventKind`]: Append-only catalog of heap operations with stable wire tags
//! - [`Event`]: One recorded call with its captured inputs and outputs
//! - [`Backdrop`]: Capability trait for the allocator events are played against
//! - [`HandleTable`]: Run-scoped mapping from capture-time handles to live ones
//! - [`SimulatedBackdrop`]: Bookkeeping-only backdrop for tests and benchmarks

pub mod backdrop;
pub mod error;
pub mod event;
pub mod handle;
pub mod play;
pub mod simulated;

// Re-export main types
pub use backdrop::{Backdrop, flags, info_class};
pub use error::*;
pub use event::*;
pub use handle::*;
pub use simulated::SimulatedBackdrop;
