//! Snooze Store for Tab Snoozer.
//!
//! Durable home of the pending snooze list. The whole list lives in one
//! key-value row (`snoozedTabs`) and is replaced atomically on every write.
//! Each successful write is published to subscribers as a [`StoreChange`].

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::broadcast;
use tracing::debug;

use crate::database::connection::Database;
use crate::types::errors::StorageError;
use crate::types::snooze::{PendingQueue, SnoozedTab, SNOOZED_TABS_KEY};

/// Buffered notifications per subscriber before it starts lagging.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Published once per successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreChange {
    pub previous_len: usize,
    pub current_len: usize,
}

impl StoreChange {
    /// The write turned an empty queue into a non-empty one.
    pub fn became_non_empty(&self) -> bool {
        self.previous_len == 0 && self.current_len > 0
    }

    pub fn is_empty(&self) -> bool {
        self.current_len == 0
    }
}

/// Trait defining the snooze store interface.
///
/// `update` is the atomic read-modify-write used by everything that derives
/// the next queue from the current one; it publishes exactly one change.
pub trait SnoozeStoreTrait: Send + Sync {
    fn get(&self) -> Result<PendingQueue, StorageError>;
    fn set(&self, queue: &[SnoozedTab]) -> Result<(), StorageError>;
    fn update(
        &self,
        mutate: &mut dyn FnMut(&mut PendingQueue),
    ) -> Result<PendingQueue, StorageError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// Snooze store backed by the SQLite key-value table.
pub struct SqliteSnoozeStore {
    db: Arc<Database>,
    changes: broadcast::Sender<StoreChange>,
}

impl SqliteSnoozeStore {
    pub fn new(db: Arc<Database>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { db, changes }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn read(conn: &Connection) -> Result<PendingQueue, StorageError> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![SNOOZED_TABS_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    fn write(conn: &Connection, queue: &[SnoozedTab]) -> Result<(), StorageError> {
        let json = serde_json::to_string(queue)?;
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![SNOOZED_TABS_KEY, json, Self::now()],
        )?;
        Ok(())
    }

    fn publish(&self, change: StoreChange) {
        debug!(
            previous = change.previous_len,
            current = change.current_len,
            "snooze queue written"
        );
        // No subscribers is fine; nothing is replayed to late subscribers anyway.
        let _ = self.changes.send(change);
    }
}

impl SnoozeStoreTrait for SqliteSnoozeStore {
    /// Returns the persisted queue, or an empty queue when nothing was stored yet.
    fn get(&self) -> Result<PendingQueue, StorageError> {
        let conn = self.db.connection();
        Self::read(&conn)
    }

    /// Replaces the persisted queue in a single transaction.
    fn set(&self, queue: &[SnoozedTab]) -> Result<(), StorageError> {
        let change = {
            let mut conn = self.db.connection();
            let tx = conn.transaction()?;
            let previous_len = Self::read(&tx)?.len();
            Self::write(&tx, queue)?;
            tx.commit()?;
            StoreChange {
                previous_len,
                current_len: queue.len(),
            }
        };
        self.publish(change);
        Ok(())
    }

    /// Applies `mutate` to the current queue and persists the result atomically.
    fn update(
        &self,
        mutate: &mut dyn FnMut(&mut PendingQueue),
    ) -> Result<PendingQueue, StorageError> {
        let (queue, change) = {
            let mut conn = self.db.connection();
            let tx = conn.transaction()?;
            let mut queue = Self::read(&tx)?;
            let previous_len = queue.len();
            mutate(&mut queue);
            Self::write(&tx, &queue)?;
            tx.commit()?;
            let change = StoreChange {
                previous_len,
                current_len: queue.len(),
            };
            (queue, change)
        };
        self.publish(change);
        Ok(queue)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Removes one occurrence of each entry in `consumed` from `queue`.
///
/// Entries written by someone else since `consumed` was read stay in place.
pub fn remove_consumed(queue: &mut PendingQueue, consumed: &[SnoozedTab]) {
    for tab in consumed {
        if let Some(pos) = queue.iter().position(|t| t == tab) {
            queue.remove(pos);
        }
    }
}
