//! Error types for bard-storage

use thiserror::Error;

use bard_core::UnsupportedKind;

use crate::event_log::FormatVersion;

/// Errors that make an event log unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Truncated input, trailing bytes or an undecodable payload
    #[error("Corrupt log: {0}")]
    CorruptLog(String),

    /// The log was written by an incompatible format version
    #[error("Log format version {found} is not supported (reader supports {supported})")]
    VersionMismatch {
        supported: FormatVersion,
        found: FormatVersion,
    },

    /// Kind tag beyond the known catalog
    #[error("Unsupported event kind: {0}")]
    UnsupportedEventKind(u16),

    /// I/O error while reading or writing a log file
    #[error("I/O error: {0}")]
    Io(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LogError {
    /// Create a new CorruptLog error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptLog(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

impl From<std::io::Error> for LogError {
    fn from(err: std::io::Error) -> Self {
        LogError::Io(err.to_string())
    }
}

/// Convert from postcard Error to LogError
impl From<postcard::Error> for LogError {
    fn from(err: postcard::Error) -> Self {
        LogError::Serialization(err.to_string())
    }
}

impl From<UnsupportedKind> for LogError {
    fn from(err: UnsupportedKind) -> Self {
        LogError::UnsupportedEventKind(err.0)
    }
}
