//! Error types for bard-story

use bard_storage::LogError;
use thiserror::Error;

/// Errors that stop a story before or instead of playing it
///
/// Failures of individual events are not errors at this level: they are
/// recorded in the stats sink and handled by the failure policy.
#[derive(Debug, Error)]
pub enum StoryError {
    /// The requested order is not a valid schedule for this log
    #[error("Invalid play order: {0}")]
    InvalidOrder(String),

    /// `play` was called without a successful `schedule`
    #[error("No play order has been scheduled")]
    NotScheduled,

    /// `schedule` was called while a schedule or run is still in place
    #[error("Story teller is not idle; call reset first")]
    NotIdle,

    #[error(transparent)]
    Log(#[from] LogError),
}

impl StoryError {
    /// Create a new InvalidOrder error
    pub fn invalid_order(message: impl Into<String>) -> Self {
        Self::InvalidOrder(message.into())
    }
}
