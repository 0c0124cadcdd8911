//! Backdrop capability contract
//!
//! A backdrop is the allocator a recorded log is played against. The
//! replay engine never looks inside it; each event kind drives exactly one
//! of the calls below and compares the result with what was captured.

use crate::error::BackdropError;
use crate::handle::LiveHandle;

/// Heap operations a backdrop must support
///
/// Implementations are driven by a single story teller at a time, which
/// holds `&mut` access for the duration of a run.
pub trait Backdrop {
    /// Return the default heap of the process
    fn process_heap(&mut self) -> Result<LiveHandle, BackdropError>;

    /// Create a private heap
    ///
    /// A `maximum_size` of zero creates a growable heap.
    fn heap_create(
        &mut self,
        options: u32,
        initial_size: u64,
        maximum_size: u64,
    ) -> Result<LiveHandle, BackdropError>;

    /// Destroy a private heap and everything allocated from it
    fn heap_destroy(&mut self, heap: LiveHandle) -> Result<(), BackdropError>;

    /// Allocate `bytes` from `heap`
    fn heap_alloc(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        bytes: u64,
    ) -> Result<LiveHandle, BackdropError>;

    /// Resize an allocation, possibly moving it
    fn heap_realloc(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
        bytes: u64,
    ) -> Result<LiveHandle, BackdropError>;

    /// Release an allocation
    fn heap_free(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
    ) -> Result<(), BackdropError>;

    /// Query the usable size of an allocation
    fn heap_size(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
    ) -> Result<u64, BackdropError>;

    /// Set a heap option
    ///
    /// `heap` is `None` for process-wide information classes.
    fn heap_set_information(
        &mut self,
        heap: Option<LiveHandle>,
        info_class: u32,
        info: &[u8],
    ) -> Result<(), BackdropError>;
}

impl<B: Backdrop + ?Sized> Backdrop for &mut B {
    fn process_heap(&mut self) -> Result<LiveHandle, BackdropError> {
        (**self).process_heap()
    }

    fn heap_create(
        &mut self,
        options: u32,
        initial_size: u64,
        maximum_size: u64,
    ) -> Result<LiveHandle, BackdropError> {
        (**self).heap_create(options, initial_size, maximum_size)
    }

    fn heap_destroy(&mut self, heap: LiveHandle) -> Result<(), BackdropError> {
        (**self).heap_destroy(heap)
    }

    fn heap_alloc(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        bytes: u64,
    ) -> Result<LiveHandle, BackdropError> {
        (**self).heap_alloc(heap, flags, bytes)
    }

    fn heap_realloc(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
        bytes: u64,
    ) -> Result<LiveHandle, BackdropError> {
        (**self).heap_realloc(heap, flags, alloc, bytes)
    }

    fn heap_free(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
    ) -> Result<(), BackdropError> {
        (**self).heap_free(heap, flags, alloc)
    }

    fn heap_size(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
    ) -> Result<u64, BackdropError> {
        (**self).heap_size(heap, flags, alloc)
    }

    fn heap_set_information(
        &mut self,
        heap: Option<LiveHandle>,
        info_class: u32,
        info: &[u8],
    ) -> Result<(), BackdropError> {
        (**self).heap_set_information(heap, info_class, info)
    }
}

/// Heap flag values carried in captured calls
pub mod flags {
    /// Skip the heap's internal lock
    pub const HEAP_NO_SERIALIZE: u32 = 0x0000_0001;
    /// Raise instead of returning null
    pub const HEAP_GENERATE_EXCEPTIONS: u32 = 0x0000_0004;
    /// Zero-fill new memory
    pub const HEAP_ZERO_MEMORY: u32 = 0x0000_0008;
    /// Fail a resize that would need to move the block
    pub const HEAP_REALLOC_IN_PLACE_ONLY: u32 = 0x0000_0010;
    /// Allow code execution from the heap
    pub const HEAP_CREATE_ENABLE_EXECUTE: u32 = 0x0004_0000;
}

/// Information classes for `heap_set_information`
pub mod info_class {
    /// Select the heap compatibility mode (e.g. low-fragmentation heap)
    pub const HEAP_COMPATIBILITY_INFORMATION: u32 = 0;
    /// Terminate the process on heap corruption
    pub const HEAP_ENABLE_TERMINATION_ON_CORRUPTION: u32 = 1;
    /// Trim cached memory
    pub const HEAP_OPTIMIZE_RESOURCES: u32 = 3;
}
