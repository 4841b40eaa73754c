//! Tab Snoozer database layer.
//!
//! Provides SQLite connection management and the key-value schema.
//!
//! # Usage
//!
//! ```no_run
//! use tab_snoozer::database::Database;
//!
//! // Open a persistent database
//! let db = Database::open("snoozer.db").expect("failed to open database");
//!
//! // Or use an in-memory database for testing
//! let db = Database::open_in_memory().expect("failed to open in-memory database");
//!
//! // Lock the underlying connection for queries
//! let conn = db.connection();
//! ```

pub mod connection;
pub mod schema;

pub use connection::Database;
