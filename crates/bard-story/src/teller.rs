//! The story teller
//!
//! Drives one event log against one backdrop:
//!
//! ```text
//! Idle --schedule--> Scheduling --play--> Playing --> Done
//!   ^                                         \----> Aborted(reason)
//!   \------------------- reset ------------------------/
//! ```
//!
//! Scheduling builds the dependency graph and the play order; an invalid
//! order leaves the teller `Idle`. Playing runs each event in order, records
//! its outcome and applies the failure policy. The log is shared, so any
//! number of tellers can replay it at once, each against its own backdrop
//! with its own handle table.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use bard_core::{Backdrop, HandleRef, HandleTable, PlayError};
use bard_storage::{EventLog, read_log};

use crate::config::{FailurePolicy, StoryConfig};
use crate::dependency::DependencyGraph;
use crate::error::StoryError;
use crate::order::PlayOrder;
use crate::stats::{Outcome, StatsSink};

/// Why a run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// Strict handles: the event at `index` referenced an unknown handle
    UnresolvedHandle { index: usize, handle: HandleRef },
    /// The failure budget was used up
    TooManyFailures,
    /// The event at `index` did not reproduce its captured outcome
    Diverged { index: usize },
    /// Stopped through a [`CancelHandle`]
    Cancelled,
}

/// Lifecycle of a story teller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoryState {
    #[default]
    Idle,
    /// An order is in place and playback has not started
    Scheduling,
    Playing,
    Done,
    Aborted(AbortReason),
}

impl StoryState {
    /// Whether the run has ended, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub state: StoryState,
    /// Events played, successful or not
    pub played: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Requests cancellation of a run from another thread
///
/// Checked between events: the event being played finishes, its effects and
/// stats are kept, and the run ends `Aborted(Cancelled)`.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Replays an event log against a backdrop
pub struct StoryTeller {
    log: Arc<EventLog>,
    config: StoryConfig,
    state: StoryState,
    /// Built on first schedule and kept across resets
    graph: Option<DependencyGraph>,
    order: Vec<usize>,
    handles: HandleTable,
    cancel: CancelHandle,
}

impl StoryTeller {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self::with_config(log, StoryConfig::default())
    }

    pub fn with_config(log: Arc<EventLog>, config: StoryConfig) -> Self {
        Self {
            log,
            config,
            state: StoryState::Idle,
            graph: None,
            order: Vec::new(),
            handles: HandleTable::new(),
            cancel: CancelHandle::default(),
        }
    }

    /// Load a log file and create a teller for it
    pub async fn open(path: impl AsRef<Path>, config: StoryConfig) -> Result<Self, StoryError> {
        let log = read_log(path).await?;
        Ok(Self::with_config(Arc::new(log), config))
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn state(&self) -> &StoryState {
        &self.state
    }

    /// Logical-to-live handle mapping of the current run
    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    /// The scheduled order, empty until `schedule` succeeds
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Dependency graph of the log, once built
    pub fn graph(&self) -> Option<&DependencyGraph> {
        self.graph.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Compute the play order
    ///
    /// On failure the teller stays `Idle` and nothing has been played.
    #[instrument(skip_all, fields(order = order.name(), events = self.log.len()))]
    pub fn schedule(&mut self, order: &PlayOrder) -> Result<(), StoryError> {
        if self.state != StoryState::Idle {
            return Err(StoryError::NotIdle);
        }
        self.state = StoryState::Scheduling;

        let log = &self.log;
        let graph = self.graph.get_or_insert_with(|| DependencyGraph::build(log));

        match order.resolve(graph) {
            Ok(resolved) => {
                debug!(edges = graph.edge_count(), "Scheduled story");
                self.order = resolved;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "Rejected play order");
                self.state = StoryState::Idle;
                Err(err)
            }
        }
    }

    /// Play the scheduled events against `backdrop`
    ///
    /// Every played event is reported to `stats`. Individual failures do not
    /// stop the run unless the failure policy says so.
    pub fn play<B, S>(&mut self, backdrop: &mut B, stats: &S) -> Result<RunReport, StoryError>
    where
        B: Backdrop + ?Sized,
        S: StatsSink + ?Sized,
    {
        if self.state != StoryState::Scheduling {
            return Err(StoryError::NotScheduled);
        }
        self.state = StoryState::Playing;
        info!(events = self.order.len(), "Playing story");

        let mut played = 0;
        let mut succeeded = 0;
        let mut failed = 0;
        let mut abort = None;

        for &index in &self.order {
            if self.cancel.is_cancelled() {
                abort = Some(AbortReason::Cancelled);
                break;
            }
            // Every scheduled index was checked against the log
            let event = self.log.events()[index].event();
            let kind = event.kind();

            let started = self.config.record_durations.then(Instant::now);
            let result = event.play(backdrop, &mut self.handles);
            let duration = started.map(|started| started.elapsed());

            stats.record(kind, &Outcome::from(&result), duration);
            played += 1;

            match result {
                Ok(()) => {
                    succeeded += 1;
                    debug!(index, %kind, "Played event");
                }
                Err(err) => {
                    failed += 1;
                    if let PlayError::Diverged { .. } = err {
                        warn!(index, error = %err, "Replay diverged from capture");
                    } else {
                        debug!(index, error = %err, "Event failed");
                    }

                    abort = abort_reason(&self.config.policy, index, &err, failed);
                    if abort.is_some() {
                        break;
                    }
                }
            }
        }

        self.state = match abort {
            Some(reason) => {
                warn!(?reason, played, failed, "Story aborted");
                StoryState::Aborted(reason)
            }
            None => {
                info!(played, succeeded, failed, "Story done");
                StoryState::Done
            }
        };

        Ok(RunReport {
            state: self.state.clone(),
            played,
            succeeded,
            failed,
        })
    }

    /// Schedule then play
    pub fn run<B, S>(
        &mut self,
        order: &PlayOrder,
        backdrop: &mut B,
        stats: &S,
    ) -> Result<RunReport, StoryError>
    where
        B: Backdrop + ?Sized,
        S: StatsSink + ?Sized,
    {
        self.schedule(order)?;
        self.play(backdrop, stats)
    }

    /// Return to `Idle` so the log can be replayed, possibly on a new backdrop
    ///
    /// Clears the handle table, the schedule and any pending cancellation.
    pub fn reset(&mut self) {
        self.state = StoryState::Idle;
        self.order.clear();
        self.handles.clear();
        self.cancel.clear();
    }
}

/// Decide whether a failed event ends the run
fn abort_reason(
    policy: &FailurePolicy,
    index: usize,
    err: &PlayError,
    failures: u64,
) -> Option<AbortReason> {
    match err {
        PlayError::UnresolvedHandle(handle) if policy.strict_handles => {
            return Some(AbortReason::UnresolvedHandle {
                index,
                handle: *handle,
            });
        }
        PlayError::Diverged { .. } if policy.abort_on_divergence => {
            return Some(AbortReason::Diverged { index });
        }
        _ => {}
    }

    match policy.max_failures {
        Some(max) if failures >= max => Some(AbortReason::TooManyFailures),
        _ => None,
    }
}
