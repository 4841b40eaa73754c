// Tab Snoozer platform paths
// Resolves the per-user config and data directories through `dirs`.

use std::env;
use std::path::PathBuf;

/// Directory name used under the platform config/data roots.
pub const APP_DIR_NAME: &str = "tab-snoozer";

/// Overrides the data directory (database location).
pub const DATA_DIR_ENV: &str = "TAB_SNOOZER_DATA_DIR";

/// Returns the configuration directory for Tab Snoozer.
///
/// - **Linux**: `$XDG_CONFIG_HOME/tab-snoozer` or `~/.config/tab-snoozer`
/// - **macOS**: `~/Library/Application Support/tab-snoozer`
/// - **Windows**: `%APPDATA%/tab-snoozer`
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Returns the data directory for Tab Snoozer.
///
/// `TAB_SNOOZER_DATA_DIR` wins when set; otherwise the platform data directory
/// (`~/.local/share/tab-snoozer` on Linux).
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Default SQLite file holding the pending snooze queue.
pub fn default_database_path() -> PathBuf {
    get_data_dir().join("snoozer.db")
}
