//! Error types for taskscale.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("notification failed: {0}")]
    Notification(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for errors that signal a broken status invariant rather than a
    /// transient store failure. These are never worth retrying.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvalidTransition { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
