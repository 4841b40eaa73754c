//! App Core for Tab Snoozer.
//!
//! Central struct holding the store, the snooze manager and the wake scheduler,
//! managing their lifecycle.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::database::connection::Database;
use crate::managers::snooze_manager::SnoozeManager;
use crate::managers::snooze_store::{SnoozeStoreTrait, SqliteSnoozeStore};
use crate::platform;
use crate::services::clock::{Clock, SystemClock};
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::services::tab_opener::TabOpener;
use crate::services::wake_scheduler::{CycleOutcome, WakeScheduler};
use crate::types::errors::SnoozeError;

/// Central application struct. One per process.
pub struct App {
    pub db: Arc<Database>,
    pub store: Arc<dyn SnoozeStoreTrait>,
    pub snooze_manager: Arc<SnoozeManager>,
    pub scheduler: WakeScheduler,
    pub clock: Arc<dyn Clock>,
    /// Scheduler interval and failure policy are read from it once, at construction.
    pub settings_engine: Mutex<SettingsEngine>,
}

impl App {
    /// Opens the database named by the engine's settings (or the default data
    /// directory) and wires everything to the host wall clock.
    ///
    /// The engine is expected to be loaded already.
    pub fn new(
        settings_engine: SettingsEngine,
        opener: Arc<dyn TabOpener>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let db_path = settings_engine
            .get_settings()
            .database_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(platform::default_database_path);
        info!(path = %db_path.display(), "opening snooze database");
        let db = Arc::new(Database::open(&db_path)?);
        Ok(Self::with_parts(db, settings_engine, opener, Arc::new(SystemClock)))
    }

    /// Builds an App from already-opened parts. Tests use this with an
    /// in-memory database and a manual clock.
    pub fn with_parts(
        db: Arc<Database>,
        settings_engine: SettingsEngine,
        opener: Arc<dyn TabOpener>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store: Arc<dyn SnoozeStoreTrait> = Arc::new(SqliteSnoozeStore::new(db.clone()));
        let settings = settings_engine.get_settings().clone();
        let snooze_manager = Arc::new(SnoozeManager::new(store.clone(), clock.clone()));
        let scheduler = WakeScheduler::new(store.clone(), opener, clock.clone())
            .with_interval(settings.check_interval())
            .with_failure_policy(settings.reopen_failure_policy);

        Self {
            db,
            store,
            snooze_manager,
            scheduler,
            clock,
            settings_engine: Mutex::new(settings_engine),
        }
    }

    /// Startup sequence: subscribe the scheduler to the store and run the
    /// startup check so anything that came due while the host was down reopens.
    pub async fn startup(&self) -> Result<CycleOutcome, SnoozeError> {
        self.scheduler.start().await
    }

    /// Shutdown sequence: stop the timer and the store listener.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}
