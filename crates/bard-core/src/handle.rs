//! Logical and live handles
//!
//! Captured events name heaps and allocations by the address values seen at
//! capture time. Those values mean nothing to the allocator a log is replayed
//! against, so every run keeps a [`HandleTable`] that maps each logical
//! [`TraceHandle`] to the [`LiveHandle`] the backdrop returned for it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlayError;

/// Capture-time handle value (a heap or allocation address in the traced process)
///
/// The null value means the captured call returned nothing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TraceHandle(pub u64);

impl TraceHandle {
    /// The null handle
    pub const NULL: TraceHandle = TraceHandle(0);

    /// Create a trace handle from a captured value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Whether this is the null handle
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Get the raw captured value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TraceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Backend-native handle produced by a backdrop during replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LiveHandle(pub u64);

impl fmt::Display for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "live:{}", self.0)
    }
}

/// Which kind of resource a handle names
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HandleSpace {
    /// A heap
    Heap,
    /// An allocation inside a heap
    Alloc,
}

impl fmt::Display for HandleSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heap => write!(f, "heap"),
            Self::Alloc => write!(f, "alloc"),
        }
    }
}

/// A logical handle qualified by its space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HandleRef {
    pub space: HandleSpace,
    pub handle: TraceHandle,
}

impl HandleRef {
    /// Reference a heap handle
    pub fn heap(handle: TraceHandle) -> Self {
        Self {
            space: HandleSpace::Heap,
            handle,
        }
    }

    /// Reference an allocation handle
    pub fn alloc(handle: TraceHandle) -> Self {
        Self {
            space: HandleSpace::Alloc,
            handle,
        }
    }
}

impl fmt::Display for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.space, self.handle)
    }
}

/// Run-scoped mapping from logical handles to live handles
///
/// Owned by whoever drives a playback run. Events resolve their inputs
/// through it and register or drop the handles they produce or destroy.
#[derive(Debug, Clone, Default)]
pub struct HandleTable {
    heaps: HashMap<TraceHandle, LiveHandle>,
    allocs: HashMap<TraceHandle, LiveHandle>,
}

impl HandleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn space(&self, space: HandleSpace) -> &HashMap<TraceHandle, LiveHandle> {
        match space {
            HandleSpace::Heap => &self.heaps,
            HandleSpace::Alloc => &self.allocs,
        }
    }

    fn space_mut(&mut self, space: HandleSpace) -> &mut HashMap<TraceHandle, LiveHandle> {
        match space {
            HandleSpace::Heap => &mut self.heaps,
            HandleSpace::Alloc => &mut self.allocs,
        }
    }

    /// Look up the live handle for a logical handle
    pub fn get(&self, handle: HandleRef) -> Option<LiveHandle> {
        self.space(handle.space).get(&handle.handle).copied()
    }

    /// Resolve a logical handle, failing with `UnresolvedHandle` if it is unknown
    pub fn resolve(&self, handle: HandleRef) -> Result<LiveHandle, PlayError> {
        self.get(handle).ok_or(PlayError::UnresolvedHandle(handle))
    }

    /// Register the live value of a logical handle
    ///
    /// Returns the previous mapping, if any.
    pub fn register(&mut self, handle: HandleRef, live: LiveHandle) -> Option<LiveHandle> {
        self.space_mut(handle.space).insert(handle.handle, live)
    }

    /// Forget a logical handle, returning its live value
    pub fn remove(&mut self, handle: HandleRef) -> Option<LiveHandle> {
        self.space_mut(handle.space).remove(&handle.handle)
    }

    /// Whether a logical handle currently resolves
    pub fn contains(&self, handle: HandleRef) -> bool {
        self.space(handle.space).contains_key(&handle.handle)
    }

    /// Number of live heaps
    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }

    /// Number of live allocations
    pub fn alloc_count(&self) -> usize {
        self.allocs.len()
    }

    /// Total number of mapped handles
    pub fn len(&self) -> usize {
        self.heaps.len() + self.allocs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heaps.is_empty() && self.allocs.is_empty()
    }

    /// Iterate over every mapping
    pub fn iter(&self) -> impl Iterator<Item = (HandleRef, LiveHandle)> + '_ {
        let heaps = self
            .heaps
            .iter()
            .map(|(trace, live)| (HandleRef::heap(*trace), *live));
        let allocs = self
            .allocs
            .iter()
            .map(|(trace, live)| (HandleRef::alloc(*trace), *live));
        heaps.chain(allocs)
    }

    /// Drop every mapping
    pub fn clear(&mut self) {
        self.heaps.clear();
        self.allocs.clear();
    }
}
