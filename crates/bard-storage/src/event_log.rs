//! Event log and its binary encoding
//!
//! A log is built once through [`EventLogBuilder`], then frozen into an
//! immutable [`EventLog`] that any number of story tellers can share.
//!
//! ## Format
//!
//! All integers are big-endian.
//!
//! ```text
//! [format_version: u32 = major << 16 | minor][event_count: u32]
//! { [kind: u16][payload_len: u32][payload: payload_len bytes] }*
//! ```
//!
//! Payloads are postcard encodings of the per-kind call structs. Bytes left
//! over after the known fields are kept as the event's extension and written
//! back unchanged, so a reader can skip fields added by a newer minor
//! version without losing them.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use bard_core::{Event, EventKind};

use crate::error::LogError;

const HEADER_LEN: usize = 8;
const EVENT_HEADER_LEN: usize = 6;

/// Log format version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    /// Version written by this crate
    pub const CURRENT: FormatVersion = FormatVersion { major: 1, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Packed form used in the log header
    pub fn to_u32(self) -> u32 {
        (u32::from(self.major) << 16) | u32::from(self.minor)
    }

    pub fn from_u32(packed: u32) -> Self {
        Self {
            major: (packed >> 16) as u16,
            minor: (packed & 0xffff) as u16,
        }
    }

    /// Whether a reader at [`FormatVersion::CURRENT`] can decode this version
    ///
    /// Minor versions only ever append payload fields, so any minor of the
    /// current major is readable.
    pub fn is_supported(self) -> bool {
        self.major == Self::CURRENT.major
    }
}

impl Default for FormatVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// One event as stored in a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    event: Event,
    /// Payload bytes beyond the fields this reader knows
    extension: Bytes,
}

impl LoggedEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            extension: Bytes::new(),
        }
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }

    pub fn extension(&self) -> &Bytes {
        &self.extension
    }
}

impl From<Event> for LoggedEvent {
    fn from(event: Event) -> Self {
        Self::new(event)
    }
}

/// Collects events in capture order
///
/// The builder is consumed by [`EventLogBuilder::build`], so nothing can be
/// appended to a log once it has been handed to a story teller.
#[derive(Debug, Default)]
pub struct EventLogBuilder {
    events: Vec<LoggedEvent>,
}

impl EventLogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    /// Append an event at the end of the log
    pub fn append(&mut self, event: Event) -> &mut Self {
        self.events.push(LoggedEvent::new(event));
        self
    }

    /// Number of events appended so far
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Freeze the log
    pub fn build(self) -> EventLog {
        EventLog {
            version: FormatVersion::CURRENT,
            events: self.events,
        }
    }
}

impl Extend<Event> for EventLogBuilder {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        self.events.extend(iter.into_iter().map(LoggedEvent::new));
    }
}

/// Immutable, ordered sequence of recorded events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLog {
    version: FormatVersion,
    events: Vec<LoggedEvent>,
}

impl EventLog {
    /// Format version the log was decoded from, or [`FormatVersion::CURRENT`]
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Event at `index` in capture order
    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index).map(LoggedEvent::event)
    }

    /// Events in capture order
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Event> + '_ {
        self.events.iter().map(LoggedEvent::event)
    }

    /// Events with their stored extensions
    pub fn events(&self) -> &[LoggedEvent] {
        &self.events
    }

    /// Number of events of each kind, indexed by kind tag
    pub fn kind_histogram(&self) -> [usize; EventKind::MAX as usize] {
        let mut histogram = [0; EventKind::MAX as usize];
        for event in &self.events {
            histogram[event.kind().as_u16() as usize] += 1;
        }
        histogram
    }

    /// Serialize the log
    ///
    /// Writes the version the log was read with, so decoding and re-encoding
    /// reproduces the input exactly.
    #[instrument(skip(self), fields(events = self.events.len()))]
    pub fn encode(&self) -> Result<Bytes, LogError> {
        let count = u32::try_from(self.events.len())
            .map_err(|_| LogError::serialization("too many events for one log"))?;

        let mut out = Vec::with_capacity(HEADER_LEN + self.events.len() * 24);
        out.extend_from_slice(&self.version.to_u32().to_be_bytes());
        out.extend_from_slice(&count.to_be_bytes());

        for (index, logged) in self.events.iter().enumerate() {
            let mut payload = logged.event.encode_payload()?;
            payload.extend_from_slice(&logged.extension);
            let len = u32::try_from(payload.len()).map_err(|_| {
                LogError::serialization(format!("payload of event {} is too large", index))
            })?;

            out.extend_from_slice(&logged.kind().as_u16().to_be_bytes());
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&payload);
        }

        debug!(bytes = out.len(), "Encoded event log");
        Ok(Bytes::from(out))
    }

    /// Parse a log produced by [`EventLog::encode`]
    ///
    /// The whole input must be consumed. Kind tags are checked before their
    /// payloads, so an unknown kind is reported even if its payload is
    /// garbage.
    #[instrument(skip(data), fields(bytes = data.len()))]
    pub fn decode(data: &[u8]) -> Result<Self, LogError> {
        let mut reader = Reader::new(data);

        let version = FormatVersion::from_u32(reader.u32("format version")?);
        if !version.is_supported() {
            return Err(LogError::VersionMismatch {
                supported: FormatVersion::CURRENT,
                found: version,
            });
        }
        let count = reader.u32("event count")? as usize;

        // Bound the allocation by what the input could possibly hold
        let mut events = Vec::with_capacity(count.min(reader.remaining() / EVENT_HEADER_LEN));
        for index in 0..count {
            let tag = reader.u16("event kind")?;
            let kind = EventKind::try_from(tag)?;
            let len = reader.u32("payload length")? as usize;
            let payload = reader.take(len, "event payload")?;

            let (event, rest) = Event::decode_payload(kind, payload).map_err(|e| {
                LogError::corrupt(format!("event {} ({}) payload: {}", index, kind, e))
            })?;
            if !rest.is_empty() {
                trace!(index, %kind, extension = rest.len(), "Keeping unknown payload tail");
            }

            events.push(LoggedEvent {
                event,
                extension: Bytes::copy_from_slice(rest),
            });
        }

        if reader.remaining() > 0 {
            return Err(LogError::corrupt(format!(
                "{} trailing bytes after {} events",
                reader.remaining(),
                count
            )));
        }

        debug!(%version, events = events.len(), "Decoded event log");
        Ok(Self { version, events })
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let mut builder = EventLogBuilder::new();
        builder.extend(iter);
        builder.build()
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a LoggedEvent;
    type IntoIter = std::slice::Iter<'a, LoggedEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

/// Bounds-checked big-endian cursor
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], LogError> {
        if self.remaining() < len {
            return Err(LogError::corrupt(format!(
                "truncated {} at offset {}: need {} bytes, have {}",
                what,
                self.offset,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u16(&mut self, what: &str) -> Result<u16, LogError> {
        let bytes = self.take(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32, LogError> {
        let bytes = self.take(4, what)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> EventLog {
        let mut builder = EventLogBuilder::new();
        builder
            .append(Event::get_process_heap(0x50_0000))
            .append(Event::heap_alloc(0x50_0000, 0, 32, 0x1000))
            .append(Event::heap_size(0x50_0000, 0, 0x1000, Some(32)))
            .append(Event::heap_free(0x50_0000, 0, 0x1000, true));
        builder.build()
    }

    #[test]
    fn test_version_packing() {
        let version = FormatVersion::new(1, 3);
        assert_eq!(version.to_u32(), 0x0001_0003);
        assert_eq!(FormatVersion::from_u32(0x0001_0003), version);
        assert_eq!(version.to_string(), "1.3");
        assert!(version.is_supported());
        assert!(!FormatVersion::new(2, 0).is_supported());
        assert!(!FormatVersion::new(0, 9).is_supported());
    }

    #[test]
    fn test_empty_log_is_header_only() {
        let log = EventLogBuilder::new().build();
        let bytes = log.encode().unwrap();
        assert_eq!(&bytes[..], &[0u8, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(EventLog::decode(&bytes).unwrap(), log);
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample_log().encode().unwrap();
        assert_eq!(&bytes[0..4], &FormatVersion::CURRENT.to_u32().to_be_bytes());
        assert_eq!(&bytes[4..8], &4u32.to_be_bytes());
        // First event is GetProcessHeap
        assert_eq!(&bytes[8..10], &0u16.to_be_bytes());
    }

    #[test]
    fn test_accessors() {
        let log = sample_log();
        assert_eq!(log.len(), 4);
        assert!(!log.is_empty());
        assert_eq!(log.get(1).map(Event::kind), Some(EventKind::HeapAlloc));
        assert!(log.get(4).is_none());

        let kinds: Vec<_> = log.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::GetProcessHeap,
                EventKind::HeapAlloc,
                EventKind::HeapSize,
                EventKind::HeapFree
            ]
        );

        let histogram = log.kind_histogram();
        assert_eq!(histogram[EventKind::HeapAlloc as usize], 1);
        assert_eq!(histogram[EventKind::HeapCreate as usize], 0);
        assert_eq!(histogram.iter().sum::<usize>(), 4);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample_log().encode().unwrap().to_vec();
        bytes.push(0);
        assert!(matches!(
            EventLog::decode(&bytes),
            Err(LogError::CorruptLog(_))
        ));
    }

    #[test]
    fn test_collect_into_log() {
        let log: EventLog = vec![Event::get_process_heap(1), Event::heap_destroy(2, false)]
            .into_iter()
            .collect();
        assert_eq!(log.len(), 2);
        assert_eq!(log.version(), FormatVersion::CURRENT);
    }
}
