//! Unit tests for the WakeScheduler: check cycles, activation, deactivation,
//! reopen failure policies, storage failures and cycle coalescing.
//!
//! Timer tests run on real time with a short interval, so every wait is
//! bounded by `wait_for`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use tab_snoozer::database::Database;
use tab_snoozer::managers::snooze_manager::{SnoozeManager, SnoozeManagerTrait};
use tab_snoozer::managers::snooze_store::{SnoozeStoreTrait, SqliteSnoozeStore, StoreChange};
use tab_snoozer::services::clock::ManualClock;
use tab_snoozer::services::tab_opener::TabOpener;
use tab_snoozer::services::wake_scheduler::{
    CheckReport, CycleOutcome, SchedulerState, WakeScheduler,
};
use tab_snoozer::types::errors::{ReopenError, SnoozeError, StorageError};
use tab_snoozer::types::settings::ReopenFailurePolicy;
use tab_snoozer::types::snooze::{PendingQueue, SnoozedTab, TabDescriptor};

const T: i64 = 1_700_000_000_000;
const FAST: Duration = Duration::from_millis(20);

/// Opener that records every URL and rejects the ones listed in `reject`.
#[derive(Default)]
struct RecordingOpener {
    opened: Mutex<Vec<String>>,
    reject: Vec<String>,
}

impl RecordingOpener {
    fn rejecting(urls: &[&str]) -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            reject: urls.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl TabOpener for RecordingOpener {
    async fn open_tab(&self, url: &str) -> Result<(), ReopenError> {
        if self.reject.iter().any(|r| r == url) {
            return Err(ReopenError::HostRejected {
                url: url.to_string(),
                reason: "rejected by test".to_string(),
            });
        }
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

/// Opener that parks inside `open_tab` until released.
#[derive(Default)]
struct GatedOpener {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl TabOpener for GatedOpener {
    async fn open_tab(&self, _url: &str) -> Result<(), ReopenError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

/// Opener that records how many entries were persisted at the moment it ran.
struct StoreProbeOpener {
    store: Arc<dyn SnoozeStoreTrait>,
    seen: Mutex<Vec<usize>>,
}

#[async_trait]
impl TabOpener for StoreProbeOpener {
    async fn open_tab(&self, _url: &str) -> Result<(), ReopenError> {
        let len = self.store.get().map(|q| q.len()).unwrap_or(usize::MAX);
        self.seen.lock().unwrap().push(len);
        Ok(())
    }
}

/// Store whose reads and writes always fail.
struct BrokenStore {
    changes: broadcast::Sender<StoreChange>,
}

impl BrokenStore {
    fn new() -> Self {
        Self {
            changes: broadcast::channel(4).0,
        }
    }
}

impl SnoozeStoreTrait for BrokenStore {
    fn get(&self) -> Result<PendingQueue, StorageError> {
        Err(StorageError::Database("disk unplugged".to_string()))
    }

    fn set(&self, _queue: &[SnoozedTab]) -> Result<(), StorageError> {
        Err(StorageError::Database("disk unplugged".to_string()))
    }

    fn update(
        &self,
        _mutate: &mut dyn FnMut(&mut PendingQueue),
    ) -> Result<PendingQueue, StorageError> {
        Err(StorageError::Database("disk unplugged".to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Store whose first `update` succeeds and later ones fail until healed.
struct FlakyStore {
    inner: Arc<SqliteSnoozeStore>,
    updates: AtomicUsize,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new(inner: Arc<SqliteSnoozeStore>) -> Self {
        Self {
            inner,
            updates: AtomicUsize::new(0),
            failing: AtomicBool::new(true),
        }
    }

    fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

impl SnoozeStoreTrait for FlakyStore {
    fn get(&self) -> Result<PendingQueue, StorageError> {
        self.inner.get()
    }

    fn set(&self, queue: &[SnoozedTab]) -> Result<(), StorageError> {
        self.inner.set(queue)
    }

    fn update(
        &self,
        mutate: &mut dyn FnMut(&mut PendingQueue),
    ) -> Result<PendingQueue, StorageError> {
        let previous = self.updates.fetch_add(1, Ordering::SeqCst);
        if previous > 0 && self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Database("disk full".to_string()));
        }
        self.inner.update(mutate)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}

fn new_store() -> Arc<SqliteSnoozeStore> {
    let db = Arc::new(Database::open_in_memory().expect("open_in_memory failed"));
    Arc::new(SqliteSnoozeStore::new(db))
}

fn entry(url: &str, wake_time: i64) -> SnoozedTab {
    SnoozedTab::new(url, url.to_uppercase(), wake_time)
}

fn completed(outcome: CycleOutcome) -> CheckReport {
    match outcome {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Coalesced => panic!("expected a completed cycle"),
    }
}

/// Polls `cond` every few milliseconds for up to two seconds.
async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

// ─── Check cycle scenarios ───

/// A single overdue entry is reopened, the store is emptied and the
/// scheduler goes idle.
#[tokio::test]
async fn test_overdue_entry_reopens_and_scheduler_idles() {
    let store = new_store();
    store.set(&[entry("a", T - 1_000)]).unwrap();
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    let report = completed(scheduler.check_now().await.unwrap());

    assert_eq!(report.reopened, vec![entry("a", T - 1_000)]);
    assert!(report.remaining.is_empty());
    assert_eq!(report.state, SchedulerState::Idle);
    assert_eq!(opener.opened(), vec!["a"]);
    assert!(store.get().unwrap().is_empty());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

/// Only the due entry is reopened; the future one is written back and the
/// scheduler keeps watching.
#[tokio::test]
async fn test_mixed_queue_keeps_future_entry_and_watches() {
    let store = new_store();
    store.set(&[entry("a", T + 1_000), entry("b", T - 1)]).unwrap();
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    let report = completed(scheduler.check_now().await.unwrap());

    assert_eq!(opener.opened(), vec!["b"]);
    assert_eq!(report.remaining, vec![entry("a", T + 1_000)]);
    assert_eq!(store.get().unwrap(), vec![entry("a", T + 1_000)]);
    assert_eq!(report.state, SchedulerState::Watching);
    assert_eq!(scheduler.state(), SchedulerState::Watching);
    scheduler.shutdown();
}

/// An entry whose wake time equals "now" is due.
#[tokio::test]
async fn test_wake_time_equal_to_now_is_due() {
    let store = new_store();
    store.set(&[entry("a", T)]).unwrap();
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    scheduler.check_now().await.unwrap();

    assert_eq!(opener.opened(), vec!["a"]);
}

/// Nothing due: no tab opens and the stored queue is left as it was.
#[tokio::test]
async fn test_nothing_due_leaves_store_untouched() {
    let store = new_store();
    let queue = vec![entry("a", T + 10), entry("b", T + 20)];
    store.set(&queue).unwrap();
    let mut changes = store.subscribe();
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    let report = completed(scheduler.check_now().await.unwrap());

    assert_eq!(report.due_count(), 0);
    assert!(opener.opened().is_empty());
    assert_eq!(store.get().unwrap(), queue);
    assert!(changes.try_recv().is_err(), "no write when nothing was due");
    scheduler.shutdown();
}

/// Running the cycle twice at the same instant reopens nothing the second time.
#[tokio::test]
async fn test_check_is_idempotent_at_same_instant() {
    let store = new_store();
    store.set(&[entry("a", T + 1_000), entry("b", T - 1)]).unwrap();
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    scheduler.check_now().await.unwrap();
    let after_first = store.get().unwrap();
    let second = completed(scheduler.check_now().await.unwrap());

    assert_eq!(second.due_count(), 0);
    assert_eq!(store.get().unwrap(), after_first);
    assert_eq!(opener.opened(), vec!["b"]);
    scheduler.shutdown();
}

/// Remaining entries are persisted before any tab is handed to the host.
#[tokio::test]
async fn test_write_back_happens_before_reopen() {
    let store = new_store();
    store
        .set(&[entry("a", T - 2), entry("b", T - 1), entry("c", T + 1)])
        .unwrap();
    let opener = Arc::new(StoreProbeOpener {
        store: store.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    scheduler.check_now().await.unwrap();

    assert_eq!(*opener.seen.lock().unwrap(), vec![1, 1]);
    scheduler.shutdown();
}

// ─── Activation / deactivation ───

/// Snoozing into an idle, empty queue arms exactly one timer, and further
/// snoozes while watching do not arm another.
#[tokio::test]
async fn test_snooze_activates_single_timer() {
    let store = new_store();
    let clock = Arc::new(ManualClock::new(T));
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener, clock.clone());
    let manager = SnoozeManager::new(store.clone(), clock);

    let startup = completed(scheduler.start().await.unwrap());
    assert_eq!(startup.state, SchedulerState::Idle);
    assert_eq!(scheduler.stats().timers_armed, 0);

    manager.snooze(TabDescriptor::new("a", "A"), T + 60_000).unwrap();
    assert!(wait_for(|| scheduler.state() == SchedulerState::Watching).await);

    manager.snooze(TabDescriptor::new("b", "B"), T + 120_000).unwrap();
    manager.snooze(TabDescriptor::new("c", "C"), T + 180_000).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(scheduler.stats().timers_armed, 1);
    assert_eq!(scheduler.state(), SchedulerState::Watching);
    scheduler.shutdown();
}

/// Once a tick empties the queue the scheduler goes idle and stops ticking.
#[tokio::test]
async fn test_tick_that_empties_queue_deactivates() {
    let store = new_store();
    let clock = Arc::new(ManualClock::new(T));
    let opener = Arc::new(RecordingOpener::default());
    let scheduler =
        WakeScheduler::new(store.clone(), opener.clone(), clock.clone()).with_interval(FAST);
    let manager = SnoozeManager::new(store.clone(), clock.clone());

    scheduler.start().await.unwrap();
    manager.snooze(TabDescriptor::new("a", "A"), T + 1_000).unwrap();
    assert!(wait_for(|| scheduler.state() == SchedulerState::Watching).await);

    clock.advance(2_000);
    assert!(wait_for(|| opener.opened() == vec!["a"]).await);
    assert!(wait_for(|| scheduler.state() == SchedulerState::Idle).await);
    assert!(store.get().unwrap().is_empty());

    let ticks = scheduler.stats().ticks;
    tokio::time::sleep(FAST * 5).await;
    assert_eq!(scheduler.stats().ticks, ticks, "no ticks while idle");
    scheduler.shutdown();
}

/// After going idle, a new snooze re-arms the timer.
#[tokio::test]
async fn test_snooze_after_idle_rearms() {
    let store = new_store();
    let clock = Arc::new(ManualClock::new(T));
    let opener = Arc::new(RecordingOpener::default());
    let scheduler =
        WakeScheduler::new(store.clone(), opener.clone(), clock.clone()).with_interval(FAST);
    let manager = SnoozeManager::new(store.clone(), clock.clone());

    scheduler.start().await.unwrap();
    manager.snooze(TabDescriptor::new("a", "A"), T).unwrap();
    assert!(wait_for(|| opener.opened().len() == 1).await);
    assert!(wait_for(|| scheduler.state() == SchedulerState::Idle).await);

    manager.snooze(TabDescriptor::new("b", "B"), T + 5_000).unwrap();
    assert!(wait_for(|| scheduler.state() == SchedulerState::Watching).await);
    assert_eq!(scheduler.stats().timers_armed, 2);
    scheduler.shutdown();
}

/// Cancelling the last pending snooze lets the next tick idle the scheduler.
#[tokio::test]
async fn test_cancel_last_entry_idles_on_next_tick() {
    let store = new_store();
    let clock = Arc::new(ManualClock::new(T));
    let opener = Arc::new(RecordingOpener::default());
    let scheduler =
        WakeScheduler::new(store.clone(), opener.clone(), clock.clone()).with_interval(FAST);
    let manager = SnoozeManager::new(store.clone(), clock);

    scheduler.start().await.unwrap();
    manager.snooze(TabDescriptor::new("a", "A"), T + 60_000).unwrap();
    assert!(wait_for(|| scheduler.state() == SchedulerState::Watching).await);

    manager.cancel("a").unwrap();
    assert!(wait_for(|| scheduler.state() == SchedulerState::Idle).await);
    assert!(opener.opened().is_empty());
    scheduler.shutdown();
}

// ─── Startup ───

/// Entries that came due while the host was down reopen on startup.
#[tokio::test]
async fn test_startup_reopens_overdue_entries() {
    let store = new_store();
    store.set(&[entry("a", T - 5_000), entry("b", T + 5_000)]).unwrap();
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    let report = completed(scheduler.start().await.unwrap());

    assert_eq!(opener.opened(), vec!["a"]);
    assert_eq!(report.state, SchedulerState::Watching);
    assert_eq!(scheduler.state(), SchedulerState::Watching);
    scheduler.shutdown();
}

/// A failing startup check still arms the timer so the next tick retries.
#[tokio::test]
async fn test_startup_failure_still_watches() {
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(
        Arc::new(BrokenStore::new()),
        opener,
        Arc::new(ManualClock::new(T)),
    );

    let result = scheduler.start().await;

    assert!(matches!(result, Err(SnoozeError::Storage(_))));
    assert_eq!(scheduler.state(), SchedulerState::Watching);
    scheduler.shutdown();
}

// ─── Failures ───

/// Storage errors abort the cycle: nothing opens and the state is unchanged.
#[tokio::test]
async fn test_storage_failure_aborts_cycle_without_transition() {
    let opener = Arc::new(RecordingOpener::default());
    let scheduler = WakeScheduler::new(
        Arc::new(BrokenStore::new()),
        opener.clone(),
        Arc::new(ManualClock::new(T)),
    );

    let result = scheduler.check_now().await;

    assert!(matches!(result, Err(SnoozeError::Storage(StorageError::Database(_)))));
    assert!(opener.opened().is_empty());
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

/// Under the default policy a rejected tab is dropped; the rest still open.
#[tokio::test]
async fn test_drop_policy_forgets_failed_reopen() {
    let store = new_store();
    store.set(&[entry("bad", T - 2), entry("good", T - 1)]).unwrap();
    let opener = Arc::new(RecordingOpener::rejecting(&["bad"]));
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)));

    let report = completed(scheduler.check_now().await.unwrap());

    assert_eq!(opener.opened(), vec!["good"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].tab.url, "bad");
    assert!(store.get().unwrap().is_empty());
    assert_eq!(report.state, SchedulerState::Idle);
}

/// Under the requeue policy a rejected tab goes back into the queue and the
/// scheduler keeps watching for the retry.
#[tokio::test]
async fn test_requeue_policy_puts_failed_reopen_back() {
    let store = new_store();
    store.set(&[entry("bad", T - 2), entry("good", T - 1)]).unwrap();
    let opener = Arc::new(RecordingOpener::rejecting(&["bad"]));
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), Arc::new(ManualClock::new(T)))
        .with_failure_policy(ReopenFailurePolicy::Requeue);

    let report = completed(scheduler.check_now().await.unwrap());

    assert_eq!(opener.opened(), vec!["good"]);
    assert_eq!(store.get().unwrap(), vec![entry("bad", T - 2)]);
    assert_eq!(report.state, SchedulerState::Watching);
    scheduler.shutdown();
}

// ─── Concurrency ───

/// A requeue write that fails keeps the rejected tab on the scheduler, keeps
/// watching, and lands the tab in the store on the next successful cycle.
#[tokio::test]
async fn test_failed_requeue_write_is_retried_next_cycle() {
    let sqlite = new_store();
    sqlite.set(&[entry("bad", T - 2)]).unwrap();
    let store = Arc::new(FlakyStore::new(sqlite.clone()));
    let opener = Arc::new(RecordingOpener::rejecting(&["bad"]));
    let scheduler = WakeScheduler::new(store.clone(), opener, Arc::new(ManualClock::new(T)))
        .with_failure_policy(ReopenFailurePolicy::Requeue);

    let result = scheduler.check_now().await;

    assert!(matches!(result, Err(SnoozeError::Storage(StorageError::Database(_)))));
    assert!(sqlite.get().unwrap().is_empty(), "due entry was already written back");
    assert_eq!(scheduler.state(), SchedulerState::Watching, "a retry is scheduled");

    store.heal();
    let report = completed(scheduler.check_now().await.unwrap());

    assert_eq!(sqlite.get().unwrap(), vec![entry("bad", T - 2)]);
    assert_eq!(report.state, SchedulerState::Watching);

    let retry = completed(scheduler.check_now().await.unwrap());
    assert_eq!(retry.failed.len(), 1, "the requeued tab is due again");
    assert_eq!(retry.failed[0].tab, entry("bad", T - 2));
    scheduler.shutdown();
}

/// A check requested while another is running is coalesced, and a snooze
/// added mid-cycle survives the write-back.
#[tokio::test]
async fn test_overlapping_check_is_coalesced_and_concurrent_add_survives() {
    let store = new_store();
    store.set(&[entry("a", T - 1)]).unwrap();
    let clock = Arc::new(ManualClock::new(T));
    let opener = Arc::new(GatedOpener::default());
    let scheduler = WakeScheduler::new(store.clone(), opener.clone(), clock.clone());
    let manager = SnoozeManager::new(store.clone(), clock);

    let running = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.check_now().await })
    };
    opener.entered.notified().await;

    let overlapping = scheduler.check_now().await.unwrap();
    assert!(matches!(overlapping, CycleOutcome::Coalesced));

    manager.snooze(TabDescriptor::new("late", "Late"), T + 60_000).unwrap();
    opener.release.notify_one();

    let report = completed(running.await.unwrap().unwrap());
    assert_eq!(report.reopened, vec![entry("a", T - 1)]);
    assert_eq!(report.state, SchedulerState::Watching);
    assert_eq!(
        store.get().unwrap(),
        vec![SnoozedTab::new("late", "Late", T + 60_000)]
    );
    scheduler.shutdown();
}

/// Shutdown stops the timer.
#[tokio::test]
async fn test_shutdown_stops_watching() {
    let store = new_store();
    store.set(&[entry("a", T + 60_000)]).unwrap();
    let scheduler = WakeScheduler::new(
        store,
        Arc::new(RecordingOpener::default()),
        Arc::new(ManualClock::new(T)),
    );

    scheduler.start().await.unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Watching);

    scheduler.shutdown();
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}
