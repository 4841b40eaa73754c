use chrono::{Local, LocalResult, NaiveDate, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};

use super::errors::ValidationError;

/// Storage key of the pending snooze list.
pub const SNOOZED_TABS_KEY: &str = "snoozedTabs";

/// A tab that was closed and should reopen at `wake_time` (epoch millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozedTab {
    pub url: String,
    pub title: String,
    pub wake_time: i64,
}

impl SnoozedTab {
    pub fn new(url: impl Into<String>, title: impl Into<String>, wake_time: i64) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            wake_time,
        }
    }

    /// True once the wake time has been reached at `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.wake_time <= now_ms
    }

    /// Wake time rendered in local time, e.g. `Oct 16, 2026, 3:45 PM`.
    ///
    /// Falls back to the raw millisecond value when it is outside chrono's range.
    pub fn wake_label(&self) -> String {
        match Local.timestamp_millis_opt(self.wake_time) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                dt.format("%b %-d, %Y, %-I:%M %p").to_string()
            }
            LocalResult::None => self.wake_time.to_string(),
        }
    }
}

/// The live tab handed over by the host when it asks for a snooze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabDescriptor {
    pub url: String,
    pub title: String,
}

impl TabDescriptor {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
        }
    }

    /// Rejects descriptors that cannot act as a cancellation key.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        Ok(())
    }

    pub fn into_snoozed(self, wake_time: i64) -> SnoozedTab {
        SnoozedTab {
            url: self.url,
            title: self.title,
            wake_time,
        }
    }
}

/// Ordered list of pending snoozes, persisted as one unit.
pub type PendingQueue = Vec<SnoozedTab>;

/// Splits `queue` into `(due, remaining)` relative to `now_ms`.
///
/// Relative order inside each half is preserved.
pub fn partition_due(queue: PendingQueue, now_ms: i64) -> (PendingQueue, PendingQueue) {
    queue.into_iter().partition(|tab| tab.is_due(now_ms))
}

/// Reads a wake time from a JSON number.
///
/// Integers are taken as-is. Floats are accepted only when they are finite,
/// integral and inside the `i64` range.
pub fn parse_wake_time(value: &serde_json::Value) -> Result<i64, ValidationError> {
    if let Some(ms) = value.as_i64() {
        return Ok(ms);
    }
    let Some(raw) = value.as_f64() else {
        return Err(ValidationError::InvalidWakeTime(value.to_string()));
    };
    if !raw.is_finite() || raw.fract() != 0.0 || raw < i64::MIN as f64 || raw >= i64::MAX as f64 {
        return Err(ValidationError::InvalidWakeTime(value.to_string()));
    }
    Ok(raw as i64)
}

/// Wake time `minutes` after `now_ms`.
pub fn wake_time_after(now_ms: i64, minutes: u64) -> Result<i64, ValidationError> {
    if minutes == 0 {
        return Err(ValidationError::InvalidDuration(minutes));
    }
    i64::try_from(minutes)
        .ok()
        .and_then(|m| m.checked_mul(60 * 1000))
        .and_then(|offset| now_ms.checked_add(offset))
        .ok_or(ValidationError::InvalidDuration(minutes))
}

/// Wake time for a local calendar date plus an `HH:MM` time of day.
pub fn wake_time_at(date: NaiveDate, time_of_day: &str) -> Result<i64, ValidationError> {
    let time = NaiveTime::parse_from_str(time_of_day.trim(), "%H:%M")
        .map_err(|_| ValidationError::InvalidTimeOfDay(time_of_day.to_string()))?;
    let naive = date.and_time(time);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.timestamp_millis()),
        // Wall-clock time skipped by a DST jump.
        LocalResult::None => Err(ValidationError::InvalidTimeOfDay(time_of_day.to_string())),
    }
}
