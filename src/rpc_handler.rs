//! RPC method handler for the marksync JSON-RPC protocol.
//!
//! Extracted from `rpc_server.rs` so it can be tested without stdin/stdout.
//! `handle_method` dispatches one call against the running session; anything
//! that completes later (a failed background delete) is reported on `events`.

use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::managers::bookmark_session::BookmarkSession;
use crate::services::storage::BookmarkStorage;
use crate::types::bookmark::Bookmark;

/// JSON shape of a bookmark as shown to clients.
pub fn bookmark_json(bookmark: &Bookmark) -> Value {
    json!({
        "id": bookmark.id,
        "user_id": bookmark.owner,
        "title": bookmark.title,
        "url": bookmark.url,
        "domain": bookmark.domain(),
        "favicon_url": bookmark.favicon_url(),
        "created_at": bookmark.created_at,
        "updated_at": bookmark.updated_at,
    })
}

fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing {}", name))
}

/// Dispatch a JSON-RPC method call to the session.
///
/// Returns `Ok(Value)` on success or `Err(String)` with an error message.
pub async fn handle_method<S: BookmarkStorage>(
    session: &mut BookmarkSession<S>,
    events: &UnboundedSender<Value>,
    method: &str,
    params: &Value,
) -> Result<Value, String> {
    match method {
        // ─── Bookmarks ───
        "bookmark.add" => {
            let title = str_param(params, "title")?;
            let url = str_param(params, "url")?;
            let record = session
                .add_bookmark(title, url)
                .await
                .map_err(|e| e.to_string())?;
            Ok(bookmark_json(&record))
        }
        "bookmark.list" => {
            let query = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
            let items: Vec<Value> = session.query(query).iter().map(bookmark_json).collect();
            Ok(json!({
                "items": items,
                "summary": session.store().summary(query),
            }))
        }
        "bookmark.delete" => {
            let id = str_param(params, "id")?;
            let pending = session.delete_bookmark(id).map_err(|e| e.to_string())?;
            let events = events.clone();
            tokio::spawn(async move {
                let id = pending.id().to_string();
                if let Err(err) = pending.outcome().await {
                    let event = json!({
                        "event": "bookmark.delete_failed",
                        "id": id,
                        "error": err.to_string(),
                    });
                    if events.send(event).is_err() {
                        warn!(%id, "delete failure not reported; event stream closed");
                    }
                }
            });
            Ok(json!({"ok": true, "id": id}))
        }

        // ─── Session ───
        "session.status" => {
            let status = session.status();
            Ok(json!({
                "owner": session.owner(),
                "status": status,
                "label": status.label(),
                "channel": session.channel(),
                "count": session.store().len(),
            }))
        }
        "session.switch_owner" => {
            let owner = str_param(params, "owner")?;
            if owner.trim().is_empty() {
                return Err("owner cannot be empty".to_string());
            }
            session
                .switch_owner(owner)
                .await
                .map_err(|e| e.to_string())?;
            Ok(json!({"ok": true, "owner": session.owner(), "count": session.store().len()}))
        }
        "session.reload" => {
            session.reload().await.map_err(|e| e.to_string())?;
            Ok(json!({"ok": true, "count": session.store().len()}))
        }

        _ => Err(format!("unknown method: {}", method)),
    }
}
