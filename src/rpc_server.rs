//! marksync RPC Server: JSON-RPC over stdin/stdout for a UI shell.
//!
//! Protocol: one JSON object per line (newline-delimited JSON).
//! Request:  {"id":1, "method":"bookmark.add", "params":{"url":"...","title":"..."}}
//! Response: {"id":1, "result":{...}} or {"id":1, "error":"..."}
//! Events:   {"event":"bookmarks.changed", ...} and {"event":"realtime.status", ...}
//!
//! Usage: `marksync-rpc <user-id>` or with `MARKSYNC_USER` set.

use std::io::{self, Write};

use marksync::app::App;
use marksync::logging;
use marksync::rpc_handler::handle_method;
use marksync::services::settings_engine::{SettingsEngine, SettingsEngineTrait};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

const USER_ENV: &str = "MARKSYNC_USER";

fn emit(message: &Value) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", message);
    let _ = stdout.flush();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut settings_engine = SettingsEngine::new(None);
    let settings = settings_engine.load()?;
    logging::init(&settings.logging.level);

    let owner = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(USER_ENV).ok())
        .filter(|o| !o.trim().is_empty())
        .ok_or_else(|| format!("usage: marksync-rpc <user-id> (or set {})", USER_ENV))?;

    let app = App::new(settings_engine)?;
    let mut session = app.open_session(&owner).await?;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Value>();
    {
        let tx = events_tx.clone();
        session.on_change(move |change| {
            let _ = tx.send(json!({"event": "bookmarks.changed", "change": change}));
        });
    }
    let mut status_rx = session.watch_status();

    // Signal ready
    emit(&json!({"event": "ready", "version": env!("CARGO_PKG_VERSION"), "owner": owner}));
    info!(%owner, "rpc server ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let live = session.channel().is_some();
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(l)) => l,
                    _ => break,
                };
                if line.trim().is_empty() { continue; }

                let req: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        emit(&json!({"id": null, "error": format!("parse error: {}", e)}));
                        continue;
                    }
                };

                let id = req.get("id").cloned().unwrap_or(Value::Null);
                let method = req.get("method").and_then(|v| v.as_str()).unwrap_or("");
                let params = req.get("params").cloned().unwrap_or(json!({}));

                let result = handle_method(&mut session, &events_tx, method, &params).await;
                let response = match result {
                    Ok(val) => json!({"id": id, "result": val}),
                    Err(err) => json!({"id": id, "error": err}),
                };
                emit(&response);
            }
            outcome = session.next_event(), if live => {
                debug!(?outcome, "change feed event handled");
            }
            Some(event) = events_rx.recv() => {
                emit(&event);
            }
            changed = status_rx.changed() => {
                if changed.is_err() { break; }
                let status = *status_rx.borrow_and_update();
                emit(&json!({
                    "event": "realtime.status",
                    "status": status,
                    "label": status.label(),
                }));
            }
        }
    }

    session.end();
    info!("stdin closed, shutting down");
    Ok(())
}
