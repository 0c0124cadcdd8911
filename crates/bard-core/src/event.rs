//! Heap call events
//!
//! Each recorded heap API call becomes one [`Event`]. The catalog of kinds is
//! append-only: [`EventKind`] values are written into serialized logs and are
//! permanent once shipped. New kinds go at the end, just below
//! [`EventKind::MAX`].

use serde::{Deserialize, Serialize};

use crate::error::UnsupportedKind;
use crate::handle::{HandleRef, TraceHandle};

/// Kind tag of an event, stable across log format versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventKind {
    GetProcessHeap = 0,
    HeapAlloc = 1,
    HeapCreate = 2,
    HeapDestroy = 3,
    HeapFree = 4,
    HeapReAlloc = 5,
    HeapSetInformation = 6,
    HeapSize = 7,
}

impl EventKind {
    /// One past the last known kind. Never a valid tag.
    pub const MAX: u16 = 8;

    /// Every known kind, in tag order
    pub const ALL: [EventKind; EventKind::MAX as usize] = [
        Self::GetProcessHeap,
        Self::HeapAlloc,
        Self::HeapCreate,
        Self::HeapDestroy,
        Self::HeapFree,
        Self::HeapReAlloc,
        Self::HeapSetInformation,
        Self::HeapSize,
    ];

    /// The wire tag
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetProcessHeap => "GetProcessHeap",
            Self::HeapAlloc => "HeapAlloc",
            Self::HeapCreate => "HeapCreate",
            Self::HeapDestroy => "HeapDestroy",
            Self::HeapFree => "HeapFree",
            Self::HeapReAlloc => "HeapReAlloc",
            Self::HeapSetInformation => "HeapSetInformation",
            Self::HeapSize => "HeapSize",
        }
    }
}

impl TryFrom<u16> for EventKind {
    type Error = UnsupportedKind;

    fn try_from(tag: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(UnsupportedKind(tag))
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `GetProcessHeap()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetProcessHeapCall {
    /// Heap handle returned at capture time
    pub trace_heap: TraceHandle,
}

/// `HeapAlloc(heap, flags, bytes)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapAllocCall {
    pub heap: TraceHandle,
    pub flags: u32,
    pub bytes: u64,
    /// Allocation returned at capture time, null if the call failed
    pub trace_alloc: TraceHandle,
}

/// `HeapCreate(options, initial_size, maximum_size)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapCreateCall {
    pub options: u32,
    pub initial_size: u64,
    pub maximum_size: u64,
    /// Heap returned at capture time, null if the call failed
    pub trace_heap: TraceHandle,
}

/// `HeapDestroy(heap)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapDestroyCall {
    pub heap: TraceHandle,
    pub succeeded: bool,
}

/// `HeapFree(heap, flags, alloc)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapFreeCall {
    pub heap: TraceHandle,
    pub flags: u32,
    pub alloc: TraceHandle,
    pub succeeded: bool,
}

/// `HeapReAlloc(heap, flags, alloc, bytes)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapReAllocCall {
    pub heap: TraceHandle,
    pub flags: u32,
    pub alloc: TraceHandle,
    pub bytes: u64,
    /// Resized allocation returned at capture time, null if the call failed
    pub trace_realloc: TraceHandle,
}

/// `HeapSetInformation(heap, info_class, info)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapSetInformationCall {
    /// Null for process-wide information classes
    pub heap: TraceHandle,
    pub info_class: u32,
    pub info: Vec<u8>,
    pub succeeded: bool,
}

/// `HeapSize(heap, flags, alloc)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapSizeCall {
    pub heap: TraceHandle,
    pub flags: u32,
    pub alloc: TraceHandle,
    /// Size reported at capture time, `None` if the call failed
    pub trace_size: Option<u64>,
}

/// A single recorded heap call
///
/// Inputs and captured outputs are fixed at construction. The kind is
/// derived from the variant and can never change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    GetProcessHeap(GetProcessHeapCall),
    HeapAlloc(HeapAllocCall),
    HeapCreate(HeapCreateCall),
    HeapDestroy(HeapDestroyCall),
    HeapFree(HeapFreeCall),
    HeapReAlloc(HeapReAllocCall),
    HeapSetInformation(HeapSetInformationCall),
    HeapSize(HeapSizeCall),
}

impl Event {
    /// The kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::GetProcessHeap(_) => EventKind::GetProcessHeap,
            Self::HeapAlloc(_) => EventKind::HeapAlloc,
            Self::HeapCreate(_) => EventKind::HeapCreate,
            Self::HeapDestroy(_) => EventKind::HeapDestroy,
            Self::HeapFree(_) => EventKind::HeapFree,
            Self::HeapReAlloc(_) => EventKind::HeapReAlloc,
            Self::HeapSetInformation(_) => EventKind::HeapSetInformation,
            Self::HeapSize(_) => EventKind::HeapSize,
        }
    }

    /// Logical handles this event reads
    pub fn consumes(&self) -> Vec<HandleRef> {
        let (heap, alloc) = match self {
            Self::GetProcessHeap(_) | Self::HeapCreate(_) => (None, None),
            Self::HeapAlloc(call) => (Some(call.heap), None),
            Self::HeapDestroy(call) => (Some(call.heap), None),
            Self::HeapFree(call) => (Some(call.heap), Some(call.alloc)),
            Self::HeapReAlloc(call) => (Some(call.heap), Some(call.alloc)),
            Self::HeapSetInformation(call) => {
                ((!call.heap.is_null()).then_some(call.heap), None)
            }
            Self::HeapSize(call) => (Some(call.heap), Some(call.alloc)),
        };

        heap.map(HandleRef::heap)
            .into_iter()
            .chain(alloc.map(HandleRef::alloc))
            .collect()
    }

    /// Logical handle this event creates, if the captured call succeeded
    pub fn produces(&self) -> Option<HandleRef> {
        let produced = match self {
            Self::GetProcessHeap(call) => HandleRef::heap(call.trace_heap),
            Self::HeapCreate(call) => HandleRef::heap(call.trace_heap),
            Self::HeapAlloc(call) => HandleRef::alloc(call.trace_alloc),
            Self::HeapReAlloc(call) => HandleRef::alloc(call.trace_realloc),
            _ => return None,
        };
        (!produced.handle.is_null()).then_some(produced)
    }

    /// Logical handle this event destroys, if the captured call succeeded
    pub fn invalidates(&self) -> Option<HandleRef> {
        match self {
            Self::HeapDestroy(call) if call.succeeded => Some(HandleRef::heap(call.heap)),
            Self::HeapFree(call) if call.succeeded => Some(HandleRef::alloc(call.alloc)),
            Self::HeapReAlloc(call) if !call.trace_realloc.is_null() => {
                Some(HandleRef::alloc(call.alloc))
            }
            _ => None,
        }
    }

    /// Whether the captured call reported success
    pub fn captured_success(&self) -> bool {
        match self {
            Self::GetProcessHeap(call) => !call.trace_heap.is_null(),
            Self::HeapAlloc(call) => !call.trace_alloc.is_null(),
            Self::HeapCreate(call) => !call.trace_heap.is_null(),
            Self::HeapDestroy(call) => call.succeeded,
            Self::HeapFree(call) => call.succeeded,
            Self::HeapReAlloc(call) => !call.trace_realloc.is_null(),
            Self::HeapSetInformation(call) => call.succeeded,
            Self::HeapSize(call) => call.trace_size.is_some(),
        }
    }

    /// Encode the kind-specific payload
    pub fn encode_payload(&self) -> Result<Vec<u8>, postcard::Error> {
        match self {
            Self::GetProcessHeap(call) => postcard::to_allocvec(call),
            Self::HeapAlloc(call) => postcard::to_allocvec(call),
            Self::HeapCreate(call) => postcard::to_allocvec(call),
            Self::HeapDestroy(call) => postcard::to_allocvec(call),
            Self::HeapFree(call) => postcard::to_allocvec(call),
            Self::HeapReAlloc(call) => postcard::to_allocvec(call),
            Self::HeapSetInformation(call) => postcard::to_allocvec(call),
            Self::HeapSize(call) => postcard::to_allocvec(call),
        }
    }

    /// Decode a payload of the given kind
    ///
    /// Returns the event and the unread tail of `payload`. A non-empty tail
    /// holds fields appended by a newer writer that this reader does not know.
    pub fn decode_payload(
        kind: EventKind,
        payload: &[u8],
    ) -> Result<(Self, &[u8]), postcard::Error> {
        fn take<'a, T: Deserialize<'a>>(
            payload: &'a [u8],
            wrap: fn(T) -> Event,
        ) -> Result<(Event, &'a [u8]), postcard::Error> {
            postcard::take_from_bytes::<T>(payload).map(|(call, rest)| (wrap(call), rest))
        }

        match kind {
            EventKind::GetProcessHeap => take(payload, Self::GetProcessHeap),
            EventKind::HeapAlloc => take(payload, Self::HeapAlloc),
            EventKind::HeapCreate => take(payload, Self::HeapCreate),
            EventKind::HeapDestroy => take(payload, Self::HeapDestroy),
            EventKind::HeapFree => take(payload, Self::HeapFree),
            EventKind::HeapReAlloc => take(payload, Self::HeapReAlloc),
            EventKind::HeapSetInformation => take(payload, Self::HeapSetInformation),
            EventKind::HeapSize => take(payload, Self::HeapSize),
        }
    }

    /// Create a GetProcessHeap event
    pub fn get_process_heap(trace_heap: u64) -> Self {
        Self::GetProcessHeap(GetProcessHeapCall {
            trace_heap: TraceHandle(trace_heap),
        })
    }

    /// Create a HeapCreate event
    pub fn heap_create(options: u32, initial_size: u64, maximum_size: u64, trace_heap: u64) -> Self {
        Self::HeapCreate(HeapCreateCall {
            options,
            initial_size,
            maximum_size,
            trace_heap: TraceHandle(trace_heap),
        })
    }

    /// Create a HeapDestroy event
    pub fn heap_destroy(heap: u64, succeeded: bool) -> Self {
        Self::HeapDestroy(HeapDestroyCall {
            heap: TraceHandle(heap),
            succeeded,
        })
    }

    /// Create a HeapAlloc event
    pub fn heap_alloc(heap: u64, flags: u32, bytes: u64, trace_alloc: u64) -> Self {
        Self::HeapAlloc(HeapAllocCall {
            heap: TraceHandle(heap),
            flags,
            bytes,
            trace_alloc: TraceHandle(trace_alloc),
        })
    }

    /// Create a HeapReAlloc event
    pub fn heap_realloc(heap: u64, flags: u32, alloc: u64, bytes: u64, trace_realloc: u64) -> Self {
        Self::HeapReAlloc(HeapReAllocCall {
            heap: TraceHandle(heap),
            flags,
            alloc: TraceHandle(alloc),
            bytes,
            trace_realloc: TraceHandle(trace_realloc),
        })
    }

    /// Create a HeapFree event
    pub fn heap_free(heap: u64, flags: u32, alloc: u64, succeeded: bool) -> Self {
        Self::HeapFree(HeapFreeCall {
            heap: TraceHandle(heap),
            flags,
            alloc: TraceHandle(alloc),
            succeeded,
        })
    }

    /// Create a HeapSize event
    pub fn heap_size(heap: u64, flags: u32, alloc: u64, trace_size: Option<u64>) -> Self {
        Self::HeapSize(HeapSizeCall {
            heap: TraceHandle(heap),
            flags,
            alloc: TraceHandle(alloc),
            trace_size,
        })
    }

    /// Create a HeapSetInformation event
    pub fn heap_set_information(heap: u64, info_class: u32, info: Vec<u8>, succeeded: bool) -> Self {
        Self::HeapSetInformation(HeapSetInformationCall {
            heap: TraceHandle(heap),
            info_class,
            info,
            succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(EventKind::GetProcessHeap.as_u16(), 0);
        assert_eq!(EventKind::HeapAlloc.as_u16(), 1);
        assert_eq!(EventKind::HeapCreate.as_u16(), 2);
        assert_eq!(EventKind::HeapDestroy.as_u16(), 3);
        assert_eq!(EventKind::HeapFree.as_u16(), 4);
        assert_eq!(EventKind::HeapReAlloc.as_u16(), 5);
        assert_eq!(EventKind::HeapSetInformation.as_u16(), 6);
        assert_eq!(EventKind::HeapSize.as_u16(), 7);
        assert_eq!(EventKind::ALL.len(), EventKind::MAX as usize);
    }

    #[test]
    fn test_kind_try_from() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::try_from(kind.as_u16()), Ok(kind));
        }
        assert_eq!(
            EventKind::try_from(EventKind::MAX),
            Err(UnsupportedKind(EventKind::MAX))
        );
        assert_eq!(EventKind::try_from(u16::MAX), Err(UnsupportedKind(u16::MAX)));
    }

    #[test]
    fn test_alloc_dataflow() {
        let event = Event::heap_alloc(0x100, 0, 64, 0x5000);
        assert_eq!(event.kind(), EventKind::HeapAlloc);
        assert_eq!(event.consumes(), vec![HandleRef::heap(TraceHandle(0x100))]);
        assert_eq!(event.produces(), Some(HandleRef::alloc(TraceHandle(0x5000))));
        assert_eq!(event.invalidates(), None);

        let failed = Event::heap_alloc(0x100, 0, 1 << 40, 0);
        assert!(!failed.captured_success());
        assert_eq!(failed.produces(), None);
    }

    #[test]
    fn test_free_dataflow() {
        let freed = Event::heap_free(0x100, 0, 0x5000, true);
        assert_eq!(
            freed.consumes(),
            vec![
                HandleRef::heap(TraceHandle(0x100)),
                HandleRef::alloc(TraceHandle(0x5000))
            ]
        );
        assert_eq!(freed.invalidates(), Some(HandleRef::alloc(TraceHandle(0x5000))));

        let rejected = Event::heap_free(0x100, 0, 0x5000, false);
        assert_eq!(rejected.invalidates(), None);
    }

    #[test]
    fn test_realloc_dataflow() {
        let moved = Event::heap_realloc(0x100, 0, 0x5000, 128, 0x6000);
        assert_eq!(moved.produces(), Some(HandleRef::alloc(TraceHandle(0x6000))));
        assert_eq!(moved.invalidates(), Some(HandleRef::alloc(TraceHandle(0x5000))));

        let failed = Event::heap_realloc(0x100, 0, 0x5000, 128, 0);
        assert_eq!(failed.produces(), None);
        assert_eq!(failed.invalidates(), None);
    }

    #[test]
    fn test_process_wide_set_information() {
        let event = Event::heap_set_information(0, 1, Vec::new(), true);
        assert!(event.consumes().is_empty());

        let event = Event::heap_set_information(0x100, 0, vec![2, 0, 0, 0], true);
        assert_eq!(event.consumes(), vec![HandleRef::heap(TraceHandle(0x100))]);
    }

    #[test]
    fn test_payload_roundtrip_preserves_event() {
        let events = vec![
            Event::get_process_heap(0x10),
            Event::heap_create(0, 4096, 0, 0x20),
            Event::heap_alloc(0x20, 8, 100, 0x2000),
            Event::heap_size(0x20, 0, 0x2000, Some(100)),
            Event::heap_set_information(0x20, 0, vec![2, 0, 0, 0], true),
        ];

        for event in events {
            let payload = event.encode_payload().unwrap();
            let (decoded, rest) = Event::decode_payload(event.kind(), &payload).unwrap();
            assert_eq!(decoded, event);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn test_decode_keeps_unknown_tail() {
        let event = Event::heap_destroy(0x20, true);
        let mut payload = event.encode_payload().unwrap();
        payload.extend_from_slice(&[0xAA, 0xBB]);

        let (decoded, rest) = Event::decode_payload(EventKind::HeapDestroy, &payload).unwrap();
        assert_eq!(decoded, event);
        assert_eq!(rest, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_decode_truncated_payload_fails() {
        let event = Event::heap_alloc(0x20, 0, 100, 0x2000);
        let payload = event.encode_payload().unwrap();
        assert!(Event::decode_payload(EventKind::HeapAlloc, &payload[..payload.len() - 1]).is_err());
        assert!(Event::decode_payload(EventKind::HeapAlloc, &[]).is_err());
    }
}
