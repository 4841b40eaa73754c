//! Tab Snoozer RPC Server — JSON-RPC over stdin/stdout for host integration.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"snooze.add", "params":{"url":"...","title":"...","minutes":15}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"ready",...} once, then {"event":"tab.open","url":"..."} per woken tab.
//!
//! Logs go to stderr; stdout carries protocol lines only.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tab_snoozer::app::App;
use tab_snoozer::rpc_handler::handle_method;
use tab_snoozer::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use tab_snoozer::services::tab_opener::HostEventOpener;

/// Simple rate limiter: max requests per second.
struct RateLimiter {
    window_start: Instant,
    request_count: u32,
    max_per_second: u32,
}

impl RateLimiter {
    fn new(max_per_second: u32) -> Self {
        Self { window_start: Instant::now(), request_count: 0, max_per_second }
    }

    /// Returns true if the request is allowed, false if rate-limited.
    fn check(&mut self) -> bool {
        let elapsed = self.window_start.elapsed();
        if elapsed.as_secs() >= 1 {
            self.window_start = Instant::now();
            self.request_count = 0;
        }
        self.request_count += 1;
        self.request_count <= self.max_per_second
    }
}

/// Writes one protocol line to stdout.
fn emit(line: &Value) {
    let mut out = io::stdout().lock();
    if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
        warn!("stdout closed; dropping protocol line");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut settings_engine = SettingsEngine::new(None);
    if let Err(e) = settings_engine.load() {
        warn!(error = %e, path = settings_engine.get_config_path(), "settings unusable; using defaults");
    }

    let (opener, mut events) = HostEventOpener::channel();
    let app = App::new(settings_engine, Arc::new(opener))?;

    // Forward reopen requests to the host as they happen.
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match serde_json::to_value(&event) {
                Ok(line) => emit(&line),
                Err(e) => error!(error = %e, "failed to encode host event"),
            }
        }
    });

    // Signal ready
    emit(&json!({"event":"ready","version":env!("CARGO_PKG_VERSION")}));

    if let Err(e) = app.startup().await {
        error!(error = %e, "startup check failed");
    }

    // Max 200 RPC requests per second
    let mut rate_limiter = RateLimiter::new(200);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() { continue; }

        let req: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                emit(&json!({"id":null,"error":format!("parse error: {}",e)}));
                continue;
            }
        };

        let id = req.get("id").cloned().unwrap_or(Value::Null);

        if !rate_limiter.check() {
            emit(&json!({"id": id, "error": "rate limit exceeded"}));
            continue;
        }

        let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
        let params = req.get("params").cloned().unwrap_or(json!({}));

        let response = match handle_method(&app, method, &params).await {
            Ok(val) => json!({"id": id, "result": val}),
            Err(err) => json!({"id": id, "error": err}),
        };
        emit(&response);
    }

    info!("stdin closed; shutting down");
    app.shutdown();
    forwarder.abort();
    Ok(())
}
