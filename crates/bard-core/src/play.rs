//! Playing events against a backdrop
//!
//! Every call kind resolves its logical inputs, issues one backdrop call,
//! compares the outcome class with what was captured and then updates the
//! handle table. Raw address values are never compared: only success versus
//! failure, plus the reported size for `HeapSize`.

use tracing::trace;

use crate::backdrop::Backdrop;
use crate::error::{BackdropError, PlayError};
use crate::event::{
    Event, EventKind, GetProcessHeapCall, HeapAllocCall, HeapCreateCall, HeapDestroyCall,
    HeapFreeCall, HeapReAllocCall, HeapSetInformationCall, HeapSizeCall,
};
use crate::handle::{HandleRef, HandleTable, LiveHandle, TraceHandle};

impl Event {
    /// Replay this event against `backdrop`
    ///
    /// `handles` is the run's logical-to-live mapping. Inputs are resolved
    /// before the backdrop is called, so an unresolved handle leaves the
    /// backdrop untouched. On success produced handles are registered and
    /// destroyed ones removed.
    pub fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        match self {
            Self::GetProcessHeap(call) => call.play(backdrop, handles),
            Self::HeapAlloc(call) => call.play(backdrop, handles),
            Self::HeapCreate(call) => call.play(backdrop, handles),
            Self::HeapDestroy(call) => call.play(backdrop, handles),
            Self::HeapFree(call) => call.play(backdrop, handles),
            Self::HeapReAlloc(call) => call.play(backdrop, handles),
            Self::HeapSetInformation(call) => call.play(backdrop, handles),
            Self::HeapSize(call) => call.play(backdrop, handles),
        }
    }
}

/// Compare a handle-producing call with its captured result
///
/// Returns the live handle to register, or `None` when both capture and
/// replay failed.
fn expect_handle(
    kind: EventKind,
    captured: TraceHandle,
    replayed: Result<LiveHandle, BackdropError>,
) -> Result<Option<LiveHandle>, PlayError> {
    match (captured.is_null(), replayed) {
        (false, Ok(live)) => Ok(Some(live)),
        (false, Err(source)) => Err(PlayError::Backdrop { kind, source }),
        (true, Ok(live)) => Err(PlayError::diverged(
            kind,
            format!("call returned {} but the captured call failed", live),
        )),
        (true, Err(_)) => Ok(None),
    }
}

/// Compare a status-only call with its captured result
fn expect_status(
    kind: EventKind,
    captured: bool,
    replayed: Result<(), BackdropError>,
) -> Result<bool, PlayError> {
    match (captured, replayed) {
        (true, Ok(())) => Ok(true),
        (true, Err(source)) => Err(PlayError::Backdrop { kind, source }),
        (false, Ok(())) => Err(PlayError::diverged(
            kind,
            "call succeeded but the captured call failed",
        )),
        (false, Err(_)) => Ok(false),
    }
}

impl GetProcessHeapCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let replayed = backdrop.process_heap();
        if let Some(live) = expect_handle(EventKind::GetProcessHeap, self.trace_heap, replayed)? {
            handles.register(HandleRef::heap(self.trace_heap), live);
        }
        Ok(())
    }
}

impl HeapCreateCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let replayed = backdrop.heap_create(self.options, self.initial_size, self.maximum_size);
        if let Some(live) = expect_handle(EventKind::HeapCreate, self.trace_heap, replayed)? {
            trace!(trace = %self.trace_heap, %live, "Heap created");
            handles.register(HandleRef::heap(self.trace_heap), live);
        }
        Ok(())
    }
}

impl HeapDestroyCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let heap = HandleRef::heap(self.heap);
        let live_heap = handles.resolve(heap)?;

        let replayed = backdrop.heap_destroy(live_heap);
        if expect_status(EventKind::HeapDestroy, self.succeeded, replayed)? {
            handles.remove(heap);
        }
        Ok(())
    }
}

impl HeapAllocCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let live_heap = handles.resolve(HandleRef::heap(self.heap))?;

        let replayed = backdrop.heap_alloc(live_heap, self.flags, self.bytes);
        if let Some(live) = expect_handle(EventKind::HeapAlloc, self.trace_alloc, replayed)? {
            handles.register(HandleRef::alloc(self.trace_alloc), live);
        }
        Ok(())
    }
}

impl HeapReAllocCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let old = HandleRef::alloc(self.alloc);
        let live_heap = handles.resolve(HandleRef::heap(self.heap))?;
        let live_alloc = handles.resolve(old)?;

        let replayed = backdrop.heap_realloc(live_heap, self.flags, live_alloc, self.bytes);
        match (self.trace_realloc.is_null(), replayed) {
            // The capture kept the original block, so later events must reach
            // wherever the backdrop moved it
            (true, Ok(moved)) => {
                handles.register(old, moved);
                Err(PlayError::diverged(
                    EventKind::HeapReAlloc,
                    format!("call returned {} but the captured call failed", moved),
                ))
            }
            (_, replayed) => {
                if let Some(live) =
                    expect_handle(EventKind::HeapReAlloc, self.trace_realloc, replayed)?
                {
                    handles.remove(old);
                    handles.register(HandleRef::alloc(self.trace_realloc), live);
                }
                Ok(())
            }
        }
    }
}

impl HeapFreeCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let alloc = HandleRef::alloc(self.alloc);
        let live_heap = handles.resolve(HandleRef::heap(self.heap))?;
        let live_alloc = handles.resolve(alloc)?;

        let replayed = backdrop.heap_free(live_heap, self.flags, live_alloc);
        if expect_status(EventKind::HeapFree, self.succeeded, replayed)? {
            handles.remove(alloc);
        }
        Ok(())
    }
}

impl HeapSizeCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let live_heap = handles.resolve(HandleRef::heap(self.heap))?;
        let live_alloc = handles.resolve(HandleRef::alloc(self.alloc))?;

        match (self.trace_size, backdrop.heap_size(live_heap, self.flags, live_alloc)) {
            (Some(captured), Ok(replayed)) if captured == replayed => Ok(()),
            (Some(captured), Ok(replayed)) => Err(PlayError::diverged(
                EventKind::HeapSize,
                format!("size {} does not match captured size {}", replayed, captured),
            )),
            (Some(_), Err(source)) => Err(PlayError::Backdrop {
                kind: EventKind::HeapSize,
                source,
            }),
            (None, Ok(replayed)) => Err(PlayError::diverged(
                EventKind::HeapSize,
                format!("size query returned {} but the captured call failed", replayed),
            )),
            (None, Err(_)) => Ok(()),
        }
    }
}

impl HeapSetInformationCall {
    fn play<B: Backdrop + ?Sized>(
        &self,
        backdrop: &mut B,
        handles: &mut HandleTable,
    ) -> Result<(), PlayError> {
        let live_heap = if self.heap.is_null() {
            None
        } else {
            Some(handles.resolve(HandleRef::heap(self.heap))?)
        };

        let replayed = backdrop.heap_set_information(live_heap, self.info_class, &self.info);
        expect_status(EventKind::HeapSetInformation, self.succeeded, replayed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backdrop::flags;
    use crate::error::FailureKind;
    use crate::simulated::SimulatedBackdrop;

    const PROCESS_HEAP: u64 = 0x0050_0000;

    fn setup() -> (SimulatedBackdrop, HandleTable) {
        let mut backdrop = SimulatedBackdrop::new();
        let mut handles = HandleTable::new();
        Event::get_process_heap(PROCESS_HEAP)
            .play(&mut backdrop, &mut handles)
            .unwrap();
        (backdrop, handles)
    }

    #[test]
    fn test_alloc_registers_handle() {
        let (mut backdrop, mut handles) = setup();

        Event::heap_alloc(PROCESS_HEAP, 0, 48, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        assert!(handles.contains(HandleRef::alloc(TraceHandle(0x1000))));
        assert_eq!(backdrop.live_allocations(), 1);
    }

    #[test]
    fn test_free_removes_handle() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_alloc(PROCESS_HEAP, 0, 48, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        Event::heap_free(PROCESS_HEAP, 0, 0x1000, true)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        assert!(!handles.contains(HandleRef::alloc(TraceHandle(0x1000))));
        assert_eq!(backdrop.live_allocations(), 0);
    }

    #[test]
    fn test_unresolved_handle_leaves_backdrop_alone() {
        let (mut backdrop, mut handles) = setup();
        let calls = backdrop.calls();

        let err = Event::heap_free(PROCESS_HEAP, 0, 0xdead, true)
            .play(&mut backdrop, &mut handles)
            .unwrap_err();

        assert_eq!(
            err,
            PlayError::UnresolvedHandle(HandleRef::alloc(TraceHandle(0xdead)))
        );
        assert_eq!(backdrop.calls(), calls);
    }

    #[test]
    fn test_realloc_swaps_handles() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_alloc(PROCESS_HEAP, 0, 16, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        Event::heap_realloc(PROCESS_HEAP, 0, 0x1000, 256, 0x2000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        assert!(!handles.contains(HandleRef::alloc(TraceHandle(0x1000))));
        assert!(handles.contains(HandleRef::alloc(TraceHandle(0x2000))));

        Event::heap_size(PROCESS_HEAP, 0, 0x2000, Some(256))
            .play(&mut backdrop, &mut handles)
            .unwrap();
    }

    #[test]
    fn test_in_place_realloc_to_same_address() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_alloc(PROCESS_HEAP, 0, 64, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        Event::heap_realloc(
            PROCESS_HEAP,
            flags::HEAP_REALLOC_IN_PLACE_ONLY,
            0x1000,
            32,
            0x1000,
        )
        .play(&mut backdrop, &mut handles)
        .unwrap();

        assert!(handles.contains(HandleRef::alloc(TraceHandle(0x1000))));
        Event::heap_size(PROCESS_HEAP, 0, 0x1000, Some(32))
            .play(&mut backdrop, &mut handles)
            .unwrap();
    }

    #[test]
    fn test_size_mismatch_diverges() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_alloc(PROCESS_HEAP, 0, 64, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        let err = Event::heap_size(PROCESS_HEAP, 0, 0x1000, Some(72))
            .play(&mut backdrop, &mut handles)
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Diverged);
    }

    #[test]
    fn test_backdrop_failure_reported() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_create(0, 0, 128, 0x0060_0000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        let err = Event::heap_alloc(0x0060_0000, 0, 1024, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap_err();

        assert!(matches!(
            err,
            PlayError::Backdrop {
                kind: EventKind::HeapAlloc,
                source: BackdropError::OutOfMemory { requested: 1024 }
            }
        ));
        assert!(!handles.contains(HandleRef::alloc(TraceHandle(0x1000))));
    }

    #[test]
    fn test_reproduced_failure_is_success() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_create(0, 0, 128, 0x0060_0000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        // The capture saw this allocation fail too
        Event::heap_alloc(0x0060_0000, 0, 1024, 0)
            .play(&mut backdrop, &mut handles)
            .unwrap();
        assert_eq!(handles.alloc_count(), 0);
    }

    #[test]
    fn test_unexpected_success_diverges() {
        let (mut backdrop, mut handles) = setup();

        let err = Event::heap_alloc(PROCESS_HEAP, 0, 8, 0)
            .play(&mut backdrop, &mut handles)
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Diverged);
        assert_eq!(handles.alloc_count(), 0);
    }

    #[test]
    fn test_unexpected_realloc_success_follows_the_block() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_alloc(PROCESS_HEAP, 0, 16, 0x1000)
            .play(&mut backdrop, &mut handles)
            .unwrap();

        // Captured as a failed resize
        let err = Event::heap_realloc(PROCESS_HEAP, 0, 0x1000, 32, 0)
            .play(&mut backdrop, &mut handles)
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Diverged);

        let block = HandleRef::alloc(TraceHandle(0x1000));
        assert_eq!(handles.alloc_count(), 1);
        assert!(handles.contains(block));

        // Later uses reach the moved block
        Event::heap_size(PROCESS_HEAP, 0, 0x1000, Some(32))
            .play(&mut backdrop, &mut handles)
            .unwrap();
        Event::heap_free(PROCESS_HEAP, 0, 0x1000, true)
            .play(&mut backdrop, &mut handles)
            .unwrap();
        assert_eq!(backdrop.live_allocations(), 0);
        assert!(!handles.contains(block));
    }

    #[test]
    fn test_destroy_heap() {
        let (mut backdrop, mut handles) = setup();
        Event::heap_create(0, 4096, 0, 0x0060_0000)
            .play(&mut backdrop, &mut handles)
            .unwrap();
        assert_eq!(handles.heap_count(), 2);

        Event::heap_destroy(0x0060_0000, true)
            .play(&mut backdrop, &mut handles)
            .unwrap();
        assert_eq!(handles.heap_count(), 1);
        assert_eq!(backdrop.live_heaps(), 1);
    }

    #[test]
    fn test_set_information_without_heap() {
        let (mut backdrop, mut handles) = setup();

        Event::heap_set_information(0, 1, Vec::new(), true)
            .play(&mut backdrop, &mut handles)
            .unwrap();
        assert!(backdrop.information(None, 1).is_some());
    }
}
