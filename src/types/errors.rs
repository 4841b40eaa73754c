use thiserror::Error;

// === StorageError ===

/// Errors raised while reading or writing the pending snooze record.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite operation failed.
    #[error("Snooze storage database error: {0}")]
    Database(String),
    /// The stored record could not be encoded or decoded.
    #[error("Snooze storage serialization error: {0}")]
    Serialization(String),
    /// The blocking storage task panicked or was cancelled.
    #[error("Snooze storage task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

// === ReopenError ===

/// Errors raised when the host cannot create a tab for a due snooze.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReopenError {
    /// The host refused to create the tab.
    #[error("Host rejected tab for {url}: {reason}")]
    HostRejected { url: String, reason: String },
    /// Nobody is listening on the host side any more.
    #[error("Host channel closed while opening {0}")]
    ChannelClosed(String),
}

// === ValidationError ===

/// Errors for snooze requests that must never enter the queue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The tab has no URL to reopen or cancel by.
    #[error("Tab URL must not be empty")]
    EmptyUrl,
    /// The wake time is not a finite integer number of milliseconds.
    #[error("Invalid wake time: {0}")]
    InvalidWakeTime(String),
    /// The snooze duration is zero or overflows.
    #[error("Invalid snooze duration: {0} minutes")]
    InvalidDuration(u64),
    /// The time of day is not `HH:MM` or does not exist locally.
    #[error("Invalid time of day: {0}")]
    InvalidTimeOfDay(String),
    /// The calendar date is not `YYYY-MM-DD`.
    #[error("Invalid date: {0}")]
    InvalidDate(String),
}

// === SnoozeError ===

/// Errors surfaced by collaborator-facing snooze operations and check cycles.
#[derive(Debug, Error)]
pub enum SnoozeError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    #[error("Settings I/O error: {0}")]
    IoError(String),
    /// Failed to serialize or deserialize settings.
    #[error("Settings serialization error: {0}")]
    SerializationError(String),
    /// The provided settings value is invalid.
    #[error("Invalid settings value: {0}")]
    InvalidValue(String),
}
