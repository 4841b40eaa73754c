//! Snooze Manager for Tab Snoozer.
//!
//! Collaborator-facing operations: snooze a tab, cancel a snooze, list what is
//! pending. Every mutation goes through [`SnoozeStoreTrait::update`], so the
//! store's change notification is what wakes the scheduler up.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::managers::snooze_store::SnoozeStoreTrait;
use crate::services::clock::Clock;
use crate::types::errors::SnoozeError;
use crate::types::snooze::{
    wake_time_after, wake_time_at, PendingQueue, SnoozedTab, TabDescriptor,
};

/// Trait defining the snooze management interface.
pub trait SnoozeManagerTrait {
    fn snooze(&self, tab: TabDescriptor, wake_time: i64) -> Result<SnoozedTab, SnoozeError>;
    fn snooze_for(&self, tab: TabDescriptor, minutes: u64) -> Result<SnoozedTab, SnoozeError>;
    fn snooze_until(
        &self,
        tab: TabDescriptor,
        date: NaiveDate,
        time_of_day: &str,
    ) -> Result<SnoozedTab, SnoozeError>;
    fn cancel(&self, url: &str) -> Result<usize, SnoozeError>;
    fn list(&self) -> Result<PendingQueue, SnoozeError>;
}

pub struct SnoozeManager {
    store: Arc<dyn SnoozeStoreTrait>,
    clock: Arc<dyn Clock>,
}

impl SnoozeManager {
    pub fn new(store: Arc<dyn SnoozeStoreTrait>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

impl SnoozeManagerTrait for SnoozeManager {
    /// Appends a snooze for `tab`. Wake times in the past are accepted and
    /// reopen on the next check.
    fn snooze(&self, tab: TabDescriptor, wake_time: i64) -> Result<SnoozedTab, SnoozeError> {
        tab.validate()?;
        let snoozed = tab.into_snoozed(wake_time);
        let entry = snoozed.clone();
        let queue = self.store.update(&mut |queue: &mut PendingQueue| queue.push(entry.clone()))?;
        info!(url = %snoozed.url, wake_time, pending = queue.len(), "tab snoozed");
        Ok(snoozed)
    }

    /// Quick snooze: wake `minutes` from now.
    fn snooze_for(&self, tab: TabDescriptor, minutes: u64) -> Result<SnoozedTab, SnoozeError> {
        let wake_time = wake_time_after(self.clock.now_millis(), minutes)?;
        self.snooze(tab, wake_time)
    }

    /// Snooze until a local calendar date at `HH:MM`.
    fn snooze_until(
        &self,
        tab: TabDescriptor,
        date: NaiveDate,
        time_of_day: &str,
    ) -> Result<SnoozedTab, SnoozeError> {
        let wake_time = wake_time_at(date, time_of_day)?;
        self.snooze(tab, wake_time)
    }

    /// Drops every snooze whose URL equals `url`. Returns how many were removed.
    fn cancel(&self, url: &str) -> Result<usize, SnoozeError> {
        let mut removed = 0;
        self.store.update(&mut |queue: &mut PendingQueue| {
            let before = queue.len();
            queue.retain(|tab| tab.url != url);
            removed = before - queue.len();
        })?;
        info!(url, removed, "snooze cancelled");
        Ok(removed)
    }

    fn list(&self) -> Result<PendingQueue, SnoozeError> {
        Ok(self.store.get()?)
    }
}
