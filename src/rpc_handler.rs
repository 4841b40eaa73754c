//! RPC method handler for the Tab Snoozer JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be unit-tested independently.
//! The `handle_method` function dispatches JSON-RPC method calls to the
//! snooze manager and the wake scheduler via the `App` struct.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};

use crate::app::App;
use crate::managers::snooze_manager::{SnoozeManager, SnoozeManagerTrait};
use crate::services::settings_engine::SettingsEngineTrait;
use crate::services::wake_scheduler::{CheckReport, CycleOutcome};
use crate::types::errors::{SnoozeError, ValidationError};
use crate::types::snooze::{parse_wake_time, SnoozedTab, TabDescriptor};

/// JSON shape of a pending snooze as shown to the host.
pub fn snoozed_tab_json(tab: &SnoozedTab) -> Value {
    json!({
        "url": tab.url,
        "title": tab.title,
        "wakeTime": tab.wake_time,
        "wakeLabel": tab.wake_label(),
    })
}

fn report_json(report: &CheckReport) -> Value {
    let woken: Vec<Value> = report.reopened.iter().map(snoozed_tab_json).collect();
    let failed: Vec<Value> = report
        .failed
        .iter()
        .map(|f| json!({"url": f.tab.url, "error": f.error.to_string()}))
        .collect();
    json!({
        "woken": woken,
        "failed": failed,
        "remaining": report.remaining.len(),
        "state": report.state,
    })
}

/// Runs a snooze manager call on the blocking pool; the store is synchronous SQLite.
async fn with_manager<T, F>(app: &App, call: F) -> Result<T, String>
where
    F: FnOnce(&SnoozeManager) -> Result<T, SnoozeError> + Send + 'static,
    T: Send + 'static,
{
    let mgr = Arc::clone(&app.snooze_manager);
    tokio::task::spawn_blocking(move || call(&mgr))
        .await
        .map_err(|e| format!("snooze task failed: {}", e))?
        .map_err(|e| e.to_string())
}

/// Dispatch a JSON-RPC method call to the appropriate handler.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method(app: &App, method: &str, params: &Value) -> Result<Value, String> {
    match method {
        // ─── Snoozes ───
        "snooze.add" => {
            let url = params.get("url").and_then(|v| v.as_str()).ok_or("missing url")?;
            let title = params.get("title").and_then(|v| v.as_str()).ok_or("missing title")?;
            let tab = TabDescriptor::new(url, title);

            let snoozed = if let Some(raw) = params.get("wakeTime") {
                let wake_time = parse_wake_time(raw).map_err(|e| e.to_string())?;
                with_manager(app, move |mgr| mgr.snooze(tab, wake_time)).await?
            } else if let Some(raw) = params.get("minutes") {
                let minutes = raw
                    .as_u64()
                    .ok_or_else(|| format!("invalid minutes: {}", raw))?;
                with_manager(app, move |mgr| mgr.snooze_for(tab, minutes)).await?
            } else if let Some(date) = params.get("date").and_then(|v| v.as_str()) {
                let time = params.get("time").and_then(|v| v.as_str()).ok_or("missing time")?.to_string();
                let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                    .map_err(|_| ValidationError::InvalidDate(date.to_string()).to_string())?;
                with_manager(app, move |mgr| mgr.snooze_until(tab, date, &time)).await?
            } else {
                return Err("missing wakeTime, minutes or date".to_string());
            };

            Ok(snoozed_tab_json(&snoozed))
        }
        "snooze.cancel" => {
            let url = params.get("url").and_then(|v| v.as_str()).ok_or("missing url")?.to_string();
            let removed = with_manager(app, move |mgr| mgr.cancel(&url)).await?;
            Ok(json!({"removed": removed}))
        }
        "snooze.list" => {
            let queue = with_manager(app, |mgr| mgr.list()).await?;
            let arr: Vec<Value> = queue.iter().map(snoozed_tab_json).collect();
            Ok(json!(arr))
        }

        // ─── Scheduler ───
        "scheduler.status" => {
            let stats = app.scheduler.stats();
            Ok(json!({
                "state": app.scheduler.state(),
                "intervalMs": app.scheduler.interval().as_millis() as u64,
                "timersArmed": stats.timers_armed,
                "ticks": stats.ticks,
            }))
        }
        "scheduler.check" => {
            match app.scheduler.check_now().await.map_err(|e| e.to_string())? {
                CycleOutcome::Completed(report) => Ok(report_json(&report)),
                CycleOutcome::Coalesced => Ok(json!({"coalesced": true})),
            }
        }

        // ─── Settings ───
        // Interval and failure policy changes apply from the next start.
        "settings.get" => {
            let engine = app.settings_engine.lock().map_err(|e| e.to_string())?;
            serde_json::to_value(engine.get_settings()).map_err(|e| e.to_string())
        }
        "settings.set" => {
            let key = params.get("key").and_then(|v| v.as_str()).ok_or("missing key")?;
            let value = params.get("value").cloned().ok_or("missing value")?;
            let mut engine = app.settings_engine.lock().map_err(|e| e.to_string())?;
            engine.set_value(key, value).map_err(|e| e.to_string())?;
            serde_json::to_value(engine.get_settings()).map_err(|e| e.to_string())
        }
        "settings.reset" => {
            let mut engine = app.settings_engine.lock().map_err(|e| e.to_string())?;
            engine.reset().map_err(|e| e.to_string())?;
            serde_json::to_value(engine.get_settings()).map_err(|e| e.to_string())
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
