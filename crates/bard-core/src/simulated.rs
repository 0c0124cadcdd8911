//! In-memory simulated backdrop
//!
//! Models heaps and allocations as bookkeeping only, without touching real
//! memory. Used to replay logs in tests, benchmarks and the CLI, and to
//! inject backdrop failures on demand.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bard_core::{Backdrop, SimulatedBackdrop};
//!
//! let mut backdrop = SimulatedBackdrop::new();
//! let heap = backdrop.process_heap().unwrap();
//! let block = backdrop.heap_alloc(heap, 0, 64).unwrap();
//! assert_eq!(backdrop.heap_size(heap, 0, block).unwrap(), 64);
//! ```

use std::collections::HashMap;

use crate::backdrop::{Backdrop, flags as heap_flags, info_class};
use crate::error::BackdropError;
use crate::handle::LiveHandle;

#[derive(Debug, Clone)]
struct SimHeap {
    options: u32,
    /// Zero means growable
    maximum_size: u64,
    in_use: u64,
    information: HashMap<u32, Vec<u8>>,
}

impl SimHeap {
    fn new(options: u32, maximum_size: u64) -> Self {
        Self {
            options,
            maximum_size,
            in_use: 0,
            information: HashMap::new(),
        }
    }

    /// Bytes in use after releasing `released` and taking `bytes`, if they fit
    ///
    /// A growable heap still cannot hold more than `u64::MAX` bytes.
    fn fit(&self, released: u64, bytes: u64) -> Option<u64> {
        let in_use = self.in_use.saturating_sub(released).checked_add(bytes)?;
        (self.maximum_size == 0 || in_use <= self.maximum_size).then_some(in_use)
    }
}

#[derive(Debug, Clone)]
struct SimAllocation {
    heap: LiveHandle,
    size: u64,
}

/// Bookkeeping-only heap allocator
#[derive(Debug, Clone)]
pub struct SimulatedBackdrop {
    next_handle: u64,
    process_heap: LiveHandle,
    heaps: HashMap<LiveHandle, SimHeap>,
    allocations: HashMap<LiveHandle, SimAllocation>,
    process_information: HashMap<u32, Vec<u8>>,
    /// Fail every n-th call
    fail_every: Option<u64>,
    calls: u64,
}

impl Default for SimulatedBackdrop {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBackdrop {
    /// Create a backdrop holding only the process heap
    pub fn new() -> Self {
        let process_heap = LiveHandle(1);
        let mut heaps = HashMap::new();
        heaps.insert(process_heap, SimHeap::new(0, 0));

        Self {
            next_handle: 2,
            process_heap,
            heaps,
            allocations: HashMap::new(),
            process_information: HashMap::new(),
            fail_every: None,
            calls: 0,
        }
    }

    /// Make every `n`-th backdrop call fail with [`BackdropError::Injected`]
    ///
    /// `0` disables fault injection.
    pub fn with_fail_every(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    /// Number of calls issued so far
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Number of heaps, including the process heap
    pub fn live_heaps(&self) -> usize {
        self.heaps.len()
    }

    /// Number of outstanding allocations
    pub fn live_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Bytes currently allocated across all heaps
    pub fn bytes_in_use(&self) -> u64 {
        self.heaps
            .values()
            .fold(0u64, |total, heap| total.saturating_add(heap.in_use))
    }

    /// Options a heap was created with
    pub fn heap_options(&self, heap: LiveHandle) -> Option<u32> {
        self.heaps.get(&heap).map(|heap| heap.options)
    }

    /// Information last set on a heap, or process-wide when `heap` is `None`
    pub fn information(&self, heap: Option<LiveHandle>, class: u32) -> Option<&[u8]> {
        let table = match heap {
            Some(heap) => &self.heaps.get(&heap)?.information,
            None => &self.process_information,
        };
        table.get(&class).map(Vec::as_slice)
    }

    fn begin_call(&mut self) -> Result<(), BackdropError> {
        self.calls += 1;
        match self.fail_every {
            Some(n) if self.calls % n == 0 => Err(BackdropError::Injected(self.calls)),
            _ => Ok(()),
        }
    }

    fn next_handle(&mut self) -> LiveHandle {
        let handle = LiveHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn heap_mut(&mut self, heap: LiveHandle) -> Result<&mut SimHeap, BackdropError> {
        self.heaps
            .get_mut(&heap)
            .ok_or(BackdropError::UnknownHeap(heap))
    }

    fn allocation(
        &self,
        heap: LiveHandle,
        alloc: LiveHandle,
    ) -> Result<&SimAllocation, BackdropError> {
        if !self.heaps.contains_key(&heap) {
            return Err(BackdropError::UnknownHeap(heap));
        }
        let allocation = self
            .allocations
            .get(&alloc)
            .ok_or(BackdropError::UnknownAllocation(alloc))?;
        if allocation.heap != heap {
            return Err(BackdropError::WrongHeap { heap, alloc });
        }
        Ok(allocation)
    }
}

impl Backdrop for SimulatedBackdrop {
    fn process_heap(&mut self) -> Result<LiveHandle, BackdropError> {
        self.begin_call()?;
        Ok(self.process_heap)
    }

    fn heap_create(
        &mut self,
        options: u32,
        initial_size: u64,
        maximum_size: u64,
    ) -> Result<LiveHandle, BackdropError> {
        self.begin_call()?;
        if maximum_size != 0 && initial_size > maximum_size {
            return Err(BackdropError::Refused(format!(
                "initial size {} exceeds maximum size {}",
                initial_size, maximum_size
            )));
        }

        let heap = self.next_handle();
        self.heaps.insert(heap, SimHeap::new(options, maximum_size));
        Ok(heap)
    }

    fn heap_destroy(&mut self, heap: LiveHandle) -> Result<(), BackdropError> {
        self.begin_call()?;
        if heap == self.process_heap {
            return Err(BackdropError::Refused(
                "the process heap cannot be destroyed".into(),
            ));
        }
        self.heaps
            .remove(&heap)
            .ok_or(BackdropError::UnknownHeap(heap))?;
        self.allocations.retain(|_, allocation| allocation.heap != heap);
        Ok(())
    }

    fn heap_alloc(
        &mut self,
        heap: LiveHandle,
        _flags: u32,
        bytes: u64,
    ) -> Result<LiveHandle, BackdropError> {
        self.begin_call()?;
        let sim_heap = self.heap_mut(heap)?;
        sim_heap.in_use = sim_heap
            .fit(0, bytes)
            .ok_or(BackdropError::OutOfMemory { requested: bytes })?;

        let alloc = self.next_handle();
        self.allocations
            .insert(alloc, SimAllocation { heap, size: bytes });
        Ok(alloc)
    }

    fn heap_realloc(
        &mut self,
        heap: LiveHandle,
        flags: u32,
        alloc: LiveHandle,
        bytes: u64,
    ) -> Result<LiveHandle, BackdropError> {
        self.begin_call()?;
        let old_size = self.allocation(heap, alloc)?.size;
        let in_place = flags & heap_flags::HEAP_REALLOC_IN_PLACE_ONLY != 0;
        if in_place && bytes > old_size {
            return Err(BackdropError::Refused(format!(
                "cannot grow {} from {} to {} bytes in place",
                alloc, old_size, bytes
            )));
        }

        let sim_heap = self.heap_mut(heap)?;
        sim_heap.in_use = sim_heap
            .fit(old_size, bytes)
            .ok_or(BackdropError::OutOfMemory { requested: bytes })?;

        let resized = if in_place {
            alloc
        } else {
            self.allocations.remove(&alloc);
            self.next_handle()
        };
        self.allocations
            .insert(resized, SimAllocation { heap, size: bytes });
        Ok(resized)
    }

    fn heap_free(
        &mut self,
        heap: LiveHandle,
        _flags: u32,
        alloc: LiveHandle,
    ) -> Result<(), BackdropError> {
        self.begin_call()?;
        let size = self.allocation(heap, alloc)?.size;
        self.allocations.remove(&alloc);
        let sim_heap = self.heap_mut(heap)?;
        sim_heap.in_use = sim_heap.in_use.saturating_sub(size);
        Ok(())
    }

    fn heap_size(
        &mut self,
        heap: LiveHandle,
        _flags: u32,
        alloc: LiveHandle,
    ) -> Result<u64, BackdropError> {
        self.begin_call()?;
        Ok(self.allocation(heap, alloc)?.size)
    }

    fn heap_set_information(
        &mut self,
        heap: Option<LiveHandle>,
        class: u32,
        info: &[u8],
    ) -> Result<(), BackdropError> {
        self.begin_call()?;
        if class == info_class::HEAP_COMPATIBILITY_INFORMATION && info.len() != 4 {
            return Err(BackdropError::Refused(format!(
                "compatibility information must be 4 bytes, got {}",
                info.len()
            )));
        }

        let table = match heap {
            Some(heap) => &mut self.heap_mut(heap)?.information,
            None => &mut self.process_information,
        };
        table.insert(class, info.to_vec());
        Ok(())
    }
}
