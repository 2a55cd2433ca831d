//! Embedded SQLite backend.
//!
//! Connection management, schema bootstrap, [`LocalStorage`], which implements
//! the storage contract and publishes every write to a change hub, and the
//! change log that carries those writes to hubs in other processes.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use marksync::database::{Database, LocalStorage};
//! use marksync::services::change_feed::ChangeHub;
//!
//! let hub = Arc::new(ChangeHub::new());
//! let db = Database::open_in_memory().expect("failed to open in-memory database");
//! let storage = LocalStorage::new(db, hub.clone());
//! ```

pub mod change_log;
pub mod connection;
pub mod migrations;
pub mod storage;

pub use change_log::ChangeLogRelay;
pub use connection::Database;
pub use storage::LocalStorage;
