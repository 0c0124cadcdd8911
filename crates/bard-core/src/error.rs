//! Error types for event playback

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventKind;
use crate::handle::{HandleRef, LiveHandle};

/// Errors reported by a backdrop for a single call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackdropError {
    #[error("Unknown heap: {0}")]
    UnknownHeap(LiveHandle),

    #[error("Unknown allocation: {0}")]
    UnknownAllocation(LiveHandle),

    #[error("Allocation {alloc} does not belong to heap {heap}")]
    WrongHeap { heap: LiveHandle, alloc: LiveHandle },

    #[error("Out of memory: requested {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("Operation refused: {0}")]
    Refused(String),

    #[error("Injected failure on call {0}")]
    Injected(u64),
}

/// A kind tag at or beyond the end of the known catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unsupported event kind: {0}")]
pub struct UnsupportedKind(pub u16);

/// Why playing a single event failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    #[error("Unresolved handle: {0}")]
    UnresolvedHandle(HandleRef),

    #[error("Backdrop failed {kind}: {source}")]
    Backdrop {
        kind: EventKind,
        #[source]
        source: BackdropError,
    },

    #[error("Replay of {kind} diverged from capture: {detail}")]
    Diverged { kind: EventKind, detail: String },
}

impl PlayError {
    /// Create a new Diverged error
    pub fn diverged(kind: EventKind, detail: impl Into<String>) -> Self {
        Self::Diverged {
            kind,
            detail: detail.into(),
        }
    }

    /// Classify this error for statistics
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::UnresolvedHandle(_) => FailureKind::UnresolvedHandle,
            Self::Backdrop { .. } => FailureKind::Backdrop,
            Self::Diverged { .. } => FailureKind::Diverged,
        }
    }
}

/// Failure classes tracked separately by the stats collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A referenced logical handle did not resolve
    UnresolvedHandle,
    /// The backdrop call itself failed
    Backdrop,
    /// The replayed outcome did not match the captured one
    Diverged,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnresolvedHandle => write!(f, "unresolved handle"),
            Self::Backdrop => write!(f, "backdrop failure"),
            Self::Diverged => write!(f, "diverged"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TraceHandle;

    #[test]
    fn test_backdrop_error_display() {
        let err = BackdropError::UnknownHeap(LiveHandle(7));
        assert!(format!("{}", err).contains("live:7"));

        let err = BackdropError::OutOfMemory { requested: 4096 };
        assert!(format!("{}", err).contains("4096"));

        let err = BackdropError::WrongHeap {
            heap: LiveHandle(1),
            alloc: LiveHandle(2),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("live:1"));
        assert!(msg.contains("live:2"));
    }

    #[test]
    fn test_play_error_display() {
        let err = PlayError::UnresolvedHandle(HandleRef::alloc(TraceHandle::new(0xbeef)));
        let msg = format!("{}", err);
        assert!(msg.contains("alloc"));
        assert!(msg.contains("0xbeef"));

        let err = PlayError::Backdrop {
            kind: EventKind::HeapFree,
            source: BackdropError::Refused("double free".to_string()),
        };
        assert!(format!("{}", err).contains("HeapFree"));

        let err = PlayError::diverged(EventKind::HeapSize, "size 16 != 32");
        assert!(format!("{}", err).contains("size 16 != 32"));
    }

    #[test]
    fn test_failure_kind_classification() {
        let unresolved = PlayError::UnresolvedHandle(HandleRef::heap(TraceHandle::new(1)));
        assert_eq!(unresolved.failure_kind(), FailureKind::UnresolvedHandle);

        let backdrop = PlayError::Backdrop {
            kind: EventKind::HeapAlloc,
            source: BackdropError::Injected(3),
        };
        assert_eq!(backdrop.failure_kind(), FailureKind::Backdrop);

        let diverged = PlayError::diverged(EventKind::HeapCreate, "unexpected success");
        assert_eq!(diverged.failure_kind(), FailureKind::Diverged);
    }
}
