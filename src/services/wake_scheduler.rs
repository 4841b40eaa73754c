//! Wake Scheduler for Tab Snoozer.
//!
//! Watches the snooze store and reopens tabs whose wake time has passed.
//!
//! The scheduler is either **Idle** (no timer) or **Watching** (one periodic
//! timer task). A store write that leaves entries pending arms the timer; a
//! check cycle that finds nothing left pending cancels it. Check cycles never
//! overlap: a cycle requested while another is running is coalesced away.
//!
//! A cycle reads the queue, splits it at "now", writes the not-yet-due part
//! back and only then asks the host to reopen the due tabs. Under the requeue
//! policy, failed tabs whose write-back did not land are parked on the
//! scheduler and merged into the next successful write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::managers::snooze_store::{remove_consumed, SnoozeStoreTrait, StoreChange};
use crate::services::clock::Clock;
use crate::services::tab_opener::TabOpener;
use crate::types::errors::{ReopenError, SnoozeError, StorageError};
use crate::types::settings::ReopenFailurePolicy;
use crate::types::snooze::{partition_due, PendingQueue, SnoozedTab};

/// Reference check interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Watching,
}

/// A due tab the host could not open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReopenFailure {
    pub tab: SnoozedTab,
    pub error: ReopenError,
}

/// What one completed check cycle did.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// The instant the queue was split at.
    pub now: i64,
    pub reopened: Vec<SnoozedTab>,
    pub failed: Vec<ReopenFailure>,
    /// Entries that were not due at `now`.
    pub remaining: PendingQueue,
    pub state: SchedulerState,
}

impl CheckReport {
    pub fn due_count(&self) -> usize {
        self.reopened.len() + self.failed.len()
    }
}

#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Completed(CheckReport),
    /// Another cycle was already running; this request was dropped.
    Coalesced,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub timers_armed: u64,
    pub ticks: u64,
}

/// Handle to the process-wide wake scheduler. Clones share one scheduler.
#[derive(Clone)]
pub struct WakeScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Arc<dyn SnoozeStoreTrait>,
    opener: Arc<dyn TabOpener>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    failure_policy: ReopenFailurePolicy,
    /// Failed reopens owed to the store; emptied by the next successful write.
    pending_requeue: Mutex<PendingQueue>,
    timer: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    cycle_gate: tokio::sync::Mutex<()>,
    timers_armed: AtomicU64,
    ticks: AtomicU64,
}

impl WakeScheduler {
    pub fn new(
        store: Arc<dyn SnoozeStoreTrait>,
        opener: Arc<dyn TabOpener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                opener,
                clock,
                interval: DEFAULT_CHECK_INTERVAL,
                failure_policy: ReopenFailurePolicy::default(),
                pending_requeue: Mutex::new(Vec::new()),
                timer: Mutex::new(None),
                listener: Mutex::new(None),
                cycle_gate: tokio::sync::Mutex::new(()),
                timers_armed: AtomicU64::new(0),
                ticks: AtomicU64::new(0),
            }),
        }
    }

    /// Overrides the check interval. Must be called before `start`.
    ///
    /// A zero interval is bumped to one millisecond.
    pub fn with_interval(self, interval: Duration) -> Self {
        self.reconfigure(|inner| inner.interval = interval.max(Duration::from_millis(1)))
    }

    pub fn with_failure_policy(self, policy: ReopenFailurePolicy) -> Self {
        self.reconfigure(|inner| inner.failure_policy = policy)
    }

    fn reconfigure(self, apply: impl FnOnce(&mut SchedulerInner)) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                apply(&mut inner);
                Self {
                    inner: Arc::new(inner),
                }
            }
            // Already shared: configuration is frozen.
            Err(inner) => {
                warn!("wake scheduler already shared; configuration change ignored");
                Self { inner }
            }
        }
    }

    /// Subscribes to store changes and runs the startup check.
    ///
    /// The subscription is taken before the startup cycle so a snooze written
    /// meanwhile is never missed. If the startup cycle fails, the scheduler
    /// arms anyway so the next tick retries.
    pub async fn start(&self) -> Result<CycleOutcome, SnoozeError> {
        {
            let mut listener = lock(&self.inner.listener);
            if listener.is_none() {
                let changes = self.inner.store.subscribe();
                let inner = Arc::clone(&self.inner);
                *listener = Some(tokio::spawn(inner.listen(changes)));
            }
        }
        info!(interval_ms = self.inner.interval.as_millis() as u64, "wake scheduler started");

        let outcome = self.inner.run_cycle().await;
        if let Err(e) = &outcome {
            error!(error = %e, "startup check failed; watching so the next tick retries");
            self.inner.arm();
        }
        outcome
    }

    /// Runs one check cycle now.
    pub async fn check_now(&self) -> Result<CycleOutcome, SnoozeError> {
        self.inner.run_cycle().await
    }

    pub fn state(&self) -> SchedulerState {
        self.inner.state()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            timers_armed: self.inner.timers_armed.load(Ordering::SeqCst),
            ticks: self.inner.ticks.load(Ordering::SeqCst),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Stops the store listener and any running timer. Used on process exit.
    pub fn shutdown(&self) {
        if let Some(listener) = lock(&self.inner.listener).take() {
            listener.abort();
        }
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
        info!("wake scheduler shut down");
    }
}

impl SchedulerInner {
    fn state(&self) -> SchedulerState {
        match lock(&self.timer).as_ref() {
            Some(handle) if !handle.is_finished() => SchedulerState::Watching,
            _ => SchedulerState::Idle,
        }
    }

    /// Starts the periodic timer unless one is already running.
    fn arm(self: &Arc<Self>) -> bool {
        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        let inner = Arc::clone(self);
        *timer = Some(tokio::spawn(inner.tick_loop()));
        self.timers_armed.fetch_add(1, Ordering::SeqCst);
        info!("wake scheduler watching");
        true
    }

    /// Cancels the timer if the store is still empty. Returns the pending count.
    ///
    /// The store is re-read under the timer lock: a snooze committed after the
    /// cycle's own read is either seen here or arms a fresh timer afterwards.
    /// When called from the timer task itself, that task ends at its next
    /// suspension point.
    fn disarm_if_empty(&self) -> Result<usize, StorageError> {
        let mut timer = lock(&self.timer);
        let pending = self.store.get()?.len() + lock(&self.pending_requeue).len();
        if pending == 0 {
            if let Some(handle) = timer.take() {
                handle.abort();
                info!("wake scheduler idle");
            }
        }
        Ok(pending)
    }

    async fn listen(self: Arc<Self>, mut changes: broadcast::Receiver<StoreChange>) {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if !change.is_empty() {
                        if change.became_non_empty() {
                            debug!(pending = change.current_len, "snooze queue no longer empty");
                        }
                        self.arm();
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Missed writes; let the next cycle decide.
                    warn!(skipped, "store change listener lagged");
                    self.arm();
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.ticks.fetch_add(1, Ordering::SeqCst);
            match self.run_cycle().await {
                Ok(CycleOutcome::Completed(report)) => debug!(
                    reopened = report.reopened.len(),
                    failed = report.failed.len(),
                    remaining = report.remaining.len(),
                    "tick complete"
                ),
                Ok(CycleOutcome::Coalesced) => debug!("tick coalesced with a running cycle"),
                Err(e) => error!(error = %e, "check cycle failed; retrying next tick"),
            }
        }
    }

    /// Keeps `tabs` for the next cycle's write-back and makes sure one runs.
    fn park_requeue(self: &Arc<Self>, tabs: PendingQueue) {
        if tabs.is_empty() {
            return;
        }
        warn!(count = tabs.len(), "requeue write failed; holding tabs for the next tick");
        lock(&self.pending_requeue).extend(tabs);
        self.arm();
    }

    async fn run_cycle(self: &Arc<Self>) -> Result<CycleOutcome, SnoozeError> {
        let Ok(_gate) = self.cycle_gate.try_lock() else {
            return Ok(CycleOutcome::Coalesced);
        };

        let store = Arc::clone(&self.store);
        let queue = blocking(move || store.get()).await?;
        let now = self.clock.now_millis();
        let (due, remaining) = partition_due(queue, now);

        let carried = std::mem::take(&mut *lock(&self.pending_requeue));
        if !due.is_empty() || !carried.is_empty() {
            // Write back before opening anything so a slow host cannot hold the queue.
            let store = Arc::clone(&self.store);
            let consumed = due.clone();
            let owed = carried.clone();
            let written = blocking(move || {
                store.update(&mut |queue: &mut PendingQueue| {
                    remove_consumed(queue, &consumed);
                    queue.extend(owed.iter().cloned());
                })
            })
            .await;
            if let Err(e) = written {
                self.park_requeue(carried);
                return Err(e.into());
            }
            if !carried.is_empty() {
                info!(count = carried.len(), "requeued tabs written back");
            }
        }

        let mut reopened = Vec::new();
        let mut failed = Vec::new();
        for tab in due {
            match self.opener.open_tab(&tab.url).await {
                Ok(()) => {
                    info!(url = %tab.url, wake_time = tab.wake_time, "tab reopened");
                    reopened.push(tab);
                }
                Err(error) => {
                    warn!(url = %tab.url, error = %error, policy = ?self.failure_policy, "tab reopen failed");
                    failed.push(ReopenFailure { tab, error });
                }
            }
        }

        if self.failure_policy == ReopenFailurePolicy::Requeue && !failed.is_empty() {
            let store = Arc::clone(&self.store);
            let retry: PendingQueue = failed.iter().map(|f| f.tab.clone()).collect();
            let owed = retry.clone();
            let written = blocking(move || {
                store.update(&mut |queue: &mut PendingQueue| queue.extend(owed.iter().cloned()))
            })
            .await;
            if let Err(e) = written {
                self.park_requeue(retry);
                return Err(e.into());
            }
        }

        let state = if remaining.is_empty() {
            let inner = Arc::clone(self);
            let pending = blocking(move || inner.disarm_if_empty()).await?;
            if pending > 0 {
                self.arm();
                SchedulerState::Watching
            } else {
                SchedulerState::Idle
            }
        } else {
            self.arm();
            SchedulerState::Watching
        };

        Ok(CycleOutcome::Completed(CheckReport {
            now,
            reopened,
            failed,
            remaining,
            state,
        }))
    }
}

async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
