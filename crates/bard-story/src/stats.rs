//! Per-kind playback statistics
//!
//! The story teller reports one `(kind, outcome, duration)` record per
//! played event to a [`StatsSink`]. [`StatsCollector`] is the stock sink:
//! it can be shared by several concurrent runs and read while they record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use bard_core::{EventKind, FailureKind, PlayError};

/// Result of playing one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Succeeded,
    Failed(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl From<&Result<(), PlayError>> for Outcome {
    fn from(result: &Result<(), PlayError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(err) => Self::Failed(err.failure_kind()),
        }
    }
}

/// Receives one record per played event
///
/// Recording never fails and must be safe to call from several runs at once.
pub trait StatsSink: Send + Sync {
    fn record(&self, kind: EventKind, outcome: &Outcome, duration: Option<Duration>);
}

impl<S: StatsSink + ?Sized> StatsSink for &S {
    fn record(&self, kind: EventKind, outcome: &Outcome, duration: Option<Duration>) {
        (**self).record(kind, outcome, duration)
    }
}

impl<S: StatsSink + ?Sized> StatsSink for Arc<S> {
    fn record(&self, kind: EventKind, outcome: &Outcome, duration: Option<Duration>) {
        (**self).record(kind, outcome, duration)
    }
}

/// Aggregate for one event kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindStats {
    pub count: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub unresolved: u64,
    pub backdrop_errors: u64,
    pub diverged: u64,
    /// Records that carried a duration
    pub timed: u64,
    /// Sum of all reported durations
    pub total_duration: Duration,
    pub min_duration: Option<Duration>,
    pub max_duration: Option<Duration>,
}

impl KindStats {
    pub fn record(&mut self, outcome: &Outcome, duration: Option<Duration>) {
        self.count += 1;
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Failed(kind) => {
                self.failed += 1;
                match kind {
                    FailureKind::UnresolvedHandle => self.unresolved += 1,
                    FailureKind::Backdrop => self.backdrop_errors += 1,
                    FailureKind::Diverged => self.diverged += 1,
                }
            }
        }

        if let Some(duration) = duration {
            self.timed += 1;
            self.total_duration += duration;
            self.min_duration = Some(self.min_duration.map_or(duration, |d| d.min(duration)));
            self.max_duration = Some(self.max_duration.map_or(duration, |d| d.max(duration)));
        }
    }

    /// Fold another aggregate into this one
    pub fn merge(&mut self, other: &KindStats) {
        self.count += other.count;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.unresolved += other.unresolved;
        self.backdrop_errors += other.backdrop_errors;
        self.diverged += other.diverged;
        self.timed += other.timed;
        self.total_duration += other.total_duration;
        self.min_duration = match (self.min_duration, other.min_duration) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max_duration = match (self.max_duration, other.max_duration) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    /// Mean duration over the events that reported one
    pub fn mean_duration(&self) -> Option<Duration> {
        let timed = u32::try_from(self.timed).ok().filter(|n| *n > 0)?;
        Some(self.total_duration / timed)
    }
}

/// Thread-safe stats sink keyed by event kind
#[derive(Debug, Default)]
pub struct StatsCollector {
    kinds: DashMap<EventKind, KindStats>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current aggregate for one kind
    pub fn get(&self, kind: EventKind) -> Option<KindStats> {
        self.kinds.get(&kind).map(|entry| entry.value().clone())
    }

    /// Copy out every aggregate
    pub fn snapshot(&self) -> StatsSnapshot {
        let kinds = self
            .kinds
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        StatsSnapshot { kinds }
    }

    pub fn clear(&self) {
        self.kinds.clear();
    }
}

impl StatsSink for StatsCollector {
    fn record(&self, kind: EventKind, outcome: &Outcome, duration: Option<Duration>) {
        self.kinds
            .entry(kind)
            .or_default()
            .record(outcome, duration);
    }
}

/// Point-in-time copy of a collector, ordered by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    kinds: BTreeMap<EventKind, KindStats>,
}

impl StatsSnapshot {
    pub fn get(&self, kind: EventKind) -> Option<&KindStats> {
        self.kinds.get(&kind)
    }

    /// All kinds folded together
    pub fn total(&self) -> KindStats {
        let mut total = KindStats::default();
        for stats in self.kinds.values() {
            total.merge(stats);
        }
        total
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, &KindStats)> + '_ {
        self.kinds.iter().map(|(kind, stats)| (*kind, stats))
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
