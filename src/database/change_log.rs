//! Change log shared through the SQLite file.
//!
//! Every write made by a [`LocalStorage`](super::LocalStorage) appends its row
//! change to `bookmark_changes` in the same transaction, tagged with the
//! storage's origin id. A [`ChangeLogRelay`] polls the log from its own
//! connection and republishes changes written by other origins to a
//! [`ChangeHub`], so sessions in different processes on one database file see
//! each other's writes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::connection::Database;
use crate::services::change_feed::ChangeHub;
use crate::types::change::ChangePayload;
use crate::types::errors::StorageError;

/// Rows kept in the log. Older ones are pruned on write.
pub const CHANGE_LOG_RETAIN: i64 = 1000;

/// One row of the change log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedChange {
    pub seq: i64,
    pub origin: String,
    pub payload: ChangePayload,
}

/// Rows read from the log in one pass.
#[derive(Debug, Default)]
pub struct ChangeBatch {
    /// Highest sequence read, including rows that failed to decode.
    pub last_seq: Option<i64>,
    pub changes: Vec<LoggedChange>,
}

/// Appends `payload` and prunes rows older than [`CHANGE_LOG_RETAIN`].
/// Call inside the transaction that made the change.
pub fn append(
    conn: &Connection,
    origin: &str,
    payload: &ChangePayload,
) -> Result<i64, StorageError> {
    let body = serde_json::to_string(payload)
        .map_err(|e| StorageError::Database(format!("Failed to encode change: {}", e)))?;
    conn.execute(
        "INSERT INTO bookmark_changes (origin, payload, recorded_at) VALUES (?1, ?2, ?3)",
        params![origin, body, Utc::now().to_rfc3339()],
    )?;
    let seq = conn.last_insert_rowid();
    conn.execute(
        "DELETE FROM bookmark_changes WHERE seq <= ?1",
        params![seq - CHANGE_LOG_RETAIN],
    )?;
    Ok(seq)
}

/// Highest sequence number written so far, 0 for an empty log.
pub fn latest_seq(conn: &Connection) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM bookmark_changes",
        [],
        |row| row.get(0),
    )?)
}

/// Lowest sequence still in the log.
pub fn oldest_seq(conn: &Connection) -> Result<Option<i64>, StorageError> {
    Ok(conn.query_row("SELECT MIN(seq) FROM bookmark_changes", [], |row| row.get(0))?)
}

/// Changes after `cursor`, oldest first. Rows that fail to decode are skipped.
pub fn read_since(conn: &Connection, cursor: i64) -> Result<ChangeBatch, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT seq, origin, payload FROM bookmark_changes WHERE seq > ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![cursor], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut batch = ChangeBatch::default();
    for row in rows {
        let (seq, origin, body) = row?;
        batch.last_seq = Some(seq);
        match serde_json::from_str(&body) {
            Ok(payload) => batch.changes.push(LoggedChange {
                seq,
                origin,
                payload,
            }),
            Err(err) => warn!(seq, error = %err, "skipping undecodable change log row"),
        }
    }
    Ok(batch)
}

/// Background task relaying foreign change-log rows into a hub.
///
/// The task stops when the relay is dropped.
pub struct ChangeLogRelay {
    origin: String,
    handle: JoinHandle<()>,
}

impl ChangeLogRelay {
    /// Opens a reader connection on `path` and starts polling every `every`.
    ///
    /// Rows tagged `origin` are skipped since that storage already published
    /// them to `hub` directly. Must be called from within a Tokio runtime.
    pub fn spawn<P: AsRef<Path>>(
        path: P,
        origin: &str,
        hub: Arc<ChangeHub>,
        every: Duration,
    ) -> Result<Self, StorageError> {
        let runtime = Handle::try_current().map_err(|e| {
            StorageError::Database(format!("change log relay needs a runtime: {}", e))
        })?;
        let db = Database::open(path)?;
        let reader = RelayReader {
            cursor: latest_seq(db.connection())?,
            db,
            origin: origin.to_string(),
            hub,
            seen_version: None,
        };
        info!(origin, cursor = reader.cursor, "change log relay started");
        let handle = runtime.spawn(reader.run(every));
        Ok(Self {
            origin: origin.to_string(),
            handle,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ChangeLogRelay {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct RelayReader {
    db: Database,
    origin: String,
    hub: Arc<ChangeHub>,
    cursor: i64,
    seen_version: Option<i64>,
}

impl RelayReader {
    async fn run(mut self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll() {
                Ok(0) => {}
                Ok(relayed) => debug!(relayed, cursor = self.cursor, "relayed change log rows"),
                Err(err) => warn!(error = %err, "change log poll failed"),
            }
        }
    }

    /// Reads new rows if another connection committed since the last poll.
    fn poll(&mut self) -> Result<usize, StorageError> {
        let conn = self.db.connection();
        let version: i64 = conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
        if self.seen_version == Some(version) {
            return Ok(0);
        }
        self.seen_version = Some(version);

        if oldest_seq(conn)?.is_some_and(|oldest| oldest > self.cursor + 1) {
            // Rows were pruned before this reader saw them.
            warn!(cursor = self.cursor, "change log gap");
            self.hub.fail_all("change log gap; reload required");
        }

        let batch = read_since(conn, self.cursor)?;
        let mut relayed = 0;
        for change in batch.changes {
            if change.origin != self.origin {
                self.hub.publish(change.payload);
                relayed += 1;
            }
        }
        if let Some(last) = batch.last_seq {
            self.cursor = last;
        }
        Ok(relayed)
    }
}
