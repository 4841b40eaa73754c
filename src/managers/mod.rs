// Tab Snoozer state managers
// Managers handle stateful operations: the persisted snooze queue and the requests that edit it.

pub mod snooze_manager;
pub mod snooze_store;
