use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the wake scheduler does with a due tab the host failed to open.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReopenFailurePolicy {
    /// Log and forget the entry (at-most-once).
    #[default]
    Drop,
    /// Put the entry back so the next tick retries it.
    Requeue,
}

/// Top-level snoozer settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnoozerSettings {
    /// Seconds between check cycles while the scheduler is watching.
    pub check_interval_secs: u64,
    pub reopen_failure_policy: ReopenFailurePolicy,
    /// Durations offered as one-click snoozes.
    pub quick_snooze_minutes: Vec<u64>,
    /// SQLite file holding the pending queue. `None` uses the data directory.
    pub database_path: Option<String>,
}

impl Default for SnoozerSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 30,
            reopen_failure_policy: ReopenFailurePolicy::Drop,
            quick_snooze_minutes: vec![15, 45],
            database_path: None,
        }
    }
}

impl SnoozerSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }
}
