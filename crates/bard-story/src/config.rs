//! Story teller configuration

use serde::{Deserialize, Serialize};

/// When a run gives up instead of moving on to the next event
///
/// The default never aborts: every failure is recorded and playback
/// continues.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePolicy {
    /// Abort on the first event whose handles do not resolve
    pub strict_handles: bool,
    /// Abort once this many events have failed
    pub max_failures: Option<u64>,
    /// Abort on the first event whose outcome differs from the capture
    pub abort_on_divergence: bool,
}

impl FailurePolicy {
    /// Abort on anything that suggests the log and backdrop disagree
    pub fn strict() -> Self {
        Self {
            strict_handles: true,
            max_failures: None,
            abort_on_divergence: true,
        }
    }

    pub fn with_strict_handles(mut self, strict: bool) -> Self {
        self.strict_handles = strict;
        self
    }

    pub fn with_max_failures(mut self, max_failures: u64) -> Self {
        self.max_failures = Some(max_failures);
        self
    }

    pub fn with_abort_on_divergence(mut self, abort: bool) -> Self {
        self.abort_on_divergence = abort;
        self
    }
}

/// Configuration for a [`StoryTeller`](crate::StoryTeller)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoryConfig {
    pub policy: FailurePolicy,
    /// Time each play call and report durations to the stats sink
    pub record_durations: bool,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            policy: FailurePolicy::default(),
            record_durations: true,
        }
    }
}

impl StoryConfig {
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_record_durations(mut self, record: bool) -> Self {
        self.record_durations = record;
        self
    }
}
