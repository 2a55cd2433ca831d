//! SQLite-backed implementation of the storage contract.
//!
//! Every successful write is published to the attached [`ChangeHub`], the way the
//! hosted database emits row changes to its realtime feed. The same change is
//! appended to the on-disk change log so relays in other processes can pick it up.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode};
use tracing::debug;
use uuid::Uuid;

use super::change_log;
use super::connection::Database;
use crate::services::change_feed::ChangeHub;
use crate::services::storage::BookmarkStorage;
use crate::types::bookmark::{Bookmark, DeleteOutcome, NewBookmark};
use crate::types::change::ChangePayload;
use crate::types::errors::StorageError;

const SELECT_COLUMNS: &str =
    "SELECT id, user_id, title, url, created_at, updated_at FROM bookmarks";

/// Storage over an embedded SQLite database.
pub struct LocalStorage {
    db: Mutex<Database>,
    hub: Arc<ChangeHub>,
    origin: String,
}

impl LocalStorage {
    pub fn new(db: Database, hub: Arc<ChangeHub>) -> Self {
        Self {
            db: Mutex::new(db),
            hub,
            origin: Uuid::new_v4().to_string(),
        }
    }

    /// Opens the database file at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P, hub: Arc<ChangeHub>) -> Result<Self, StorageError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::Database(format!("Failed to create data directory: {}", e))
                })?;
            }
        }
        Ok(Self::new(Database::open(path)?, hub))
    }

    /// The hub this storage publishes to.
    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.hub
    }

    /// Tag written with this storage's change-log rows.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Renames a bookmark and publishes an update event.
    /// Returns `None` when no row has that id.
    pub fn rename(&self, id: &str, title: &str) -> Result<Option<Bookmark>, StorageError> {
        let record = {
            let db = self.db();
            let tx = db.connection().unchecked_transaction()?;
            let affected = tx
                .execute(
                    "UPDATE bookmarks SET title = ?1, updated_at = ?2 WHERE id = ?3",
                    params![title, timestamp(Utc::now()), id],
                )
                .map_err(map_write_error)?;
            if affected == 0 {
                return Ok(None);
            }
            let Some(record) = fetch_one(&tx, id)? else {
                return Ok(None);
            };
            change_log::append(&tx, &self.origin, &ChangePayload::update(&record))?;
            tx.commit()?;
            record
        };
        self.hub.publish(ChangePayload::update(&record));
        Ok(Some(record))
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn list_rows(&self, owner: &str) -> Result<Vec<Bookmark>, StorageError> {
        let db = self.db();
        let mut stmt = db.connection().prepare(&format!(
            "{} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![owner], row_to_bookmark)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn insert_row(&self, new: NewBookmark) -> Result<Bookmark, StorageError> {
        let now = Utc::now();
        let record = Bookmark {
            id: Uuid::new_v4().to_string(),
            owner: new.user_id,
            title: new.title,
            url: new.url,
            created_at: now,
            updated_at: now,
        };
        let payload = ChangePayload::insert(&record);
        {
            let db = self.db();
            let tx = db.connection().unchecked_transaction()?;
            tx.execute(
                "INSERT INTO bookmarks (id, user_id, title, url, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![record.id, record.owner, record.title, record.url, timestamp(now)],
            )
            .map_err(map_write_error)?;
            change_log::append(&tx, &self.origin, &payload)?;
            tx.commit()?;
        }

        debug!(id = %record.id, "bookmark row inserted");
        self.hub.publish(payload);
        Ok(record)
    }

    fn delete_row(&self, id: &str) -> Result<DeleteOutcome, StorageError> {
        let payload = ChangePayload::delete(id);
        {
            let db = self.db();
            let tx = db.connection().unchecked_transaction()?;
            let affected = tx
                .execute("DELETE FROM bookmarks WHERE id = ?1", params![id])
                .map_err(map_write_error)?;
            if affected == 0 {
                return Ok(DeleteOutcome::NotFound);
            }
            change_log::append(&tx, &self.origin, &payload)?;
            tx.commit()?;
        }
        debug!(id, "bookmark row deleted");
        self.hub.publish(payload);
        Ok(DeleteOutcome::Deleted)
    }
}

impl BookmarkStorage for LocalStorage {
    async fn list(&self, owner: &str) -> Result<Vec<Bookmark>, StorageError> {
        self.list_rows(owner)
    }

    async fn create(&self, new: NewBookmark) -> Result<Bookmark, StorageError> {
        self.insert_row(new)
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, StorageError> {
        self.delete_row(id)
    }
}

/// Fixed-width RFC 3339 so lexical and chronological order agree.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn fetch_one(conn: &Connection, id: &str) -> Result<Option<Bookmark>, StorageError> {
    let mut stmt = conn.prepare(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
    let mut rows = stmt.query_map(params![id], row_to_bookmark)?;
    match rows.next() {
        Some(row) => Ok(Some(row?)),
        None => Ok(None),
    }
}

fn row_to_bookmark(row: &rusqlite::Row) -> rusqlite::Result<Bookmark> {
    Ok(Bookmark {
        id: row.get(0)?,
        owner: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        created_at: parse_timestamp(row, 4)?,
        updated_at: parse_timestamp(row, 5)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_write_error(err: rusqlite::Error) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StorageError::Rejected(err.to_string()),
        _ => StorageError::Database(err.to_string()),
    }
}
