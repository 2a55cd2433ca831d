//! Change feed over the hosted realtime websocket.
//!
//! Each channel gets its own socket and task. The task joins
//! `realtime:<channel>` for all row changes on `public.bookmarks`, keeps the
//! socket alive with heartbeats and forwards replies and row changes to the
//! channel inbox as [`FeedMessage`]s. Releasing a channel sends `phx_leave`
//! and closes the socket.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::services::change_feed::{ChangeFeed, Subscription};
use crate::types::change::{ChangeKind, ChangePayload, FeedMessage};
use crate::types::errors::FeedError;
use crate::types::settings::{RealtimeSettings, StorageSettings};

const SOCKET_PATH: &str = "realtime/v1/websocket";
const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_REF: &str = "1";
const SCHEMA: &str = "public";
const TABLE: &str = "bookmarks";

/// Change feed backed by the hosted realtime service.
pub struct RealtimeFeed {
    endpoint: Url,
    access_token: Option<String>,
    heartbeat: Duration,
    channels: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl RealtimeFeed {
    pub fn new(endpoint: Url, access_token: Option<String>) -> Self {
        Self {
            endpoint,
            access_token,
            heartbeat: Duration::from_secs(25),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(
        storage: &StorageSettings,
        realtime: &RealtimeSettings,
    ) -> Result<Self, FeedError> {
        let endpoint = socket_url(&storage.rest_url, &storage.api_key)?;
        Ok(Self::new(endpoint, storage.access_token.clone())
            .with_heartbeat(Duration::from_secs(realtime.heartbeat_secs.max(1))))
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Names of the channels whose socket task has not been released.
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_channels().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ChangeFeed for RealtimeFeed {
    fn subscribe(&self, channel: &str) -> Result<Subscription, FeedError> {
        let runtime = Handle::try_current()
            .map_err(|e| FeedError::SubscribeFailed(format!("no async runtime: {}", e)))?;
        let mut channels = self.lock_channels();
        if channels.contains_key(channel) {
            return Err(FeedError::SubscribeFailed(format!(
                "channel already open: {}",
                channel
            )));
        }

        let (tx, inbox) = mpsc::unbounded_channel();
        let (leave_tx, leave_rx) = oneshot::channel();
        let socket = ChannelSocket {
            endpoint: self.endpoint.clone(),
            topic: topic_for(channel),
            join: join_frame(&topic_for(channel), self.access_token.as_deref()),
            heartbeat: self.heartbeat,
            inbox: tx,
        };
        runtime.spawn(socket.run(leave_rx));
        channels.insert(channel.to_string(), leave_tx);

        debug!(channel, "realtime channel requested");
        Ok(Subscription {
            channel: channel.to_string(),
            inbox,
        })
    }

    fn unsubscribe(&self, channel: &str) {
        match self.lock_channels().remove(channel) {
            Some(leave) => {
                // The task may already have exited after a socket error.
                let _ = leave.send(());
                debug!(channel, "realtime channel released");
            }
            None => warn!(channel, "release of a channel that is not open"),
        }
    }
}

/// Websocket url for the realtime service next to `rest_url`.
pub fn socket_url(rest_url: &str, api_key: &str) -> Result<Url, FeedError> {
    let mut url = Url::parse(rest_url)
        .map_err(|e| FeedError::SubscribeFailed(format!("invalid url {}: {}", rest_url, e)))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(FeedError::SubscribeFailed(format!(
                "unsupported scheme for realtime: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        FeedError::SubscribeFailed(format!("cannot use {} for {}", scheme, rest_url))
    })?;
    url.set_path(SOCKET_PATH);
    url.set_query(None);
    url.query_pairs_mut()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

pub fn topic_for(channel: &str) -> String {
    format!("realtime:{}", channel)
}

/// `phx_join` asking for every row change on the bookmarks table.
pub fn join_frame(topic: &str, access_token: Option<&str>) -> Value {
    let mut payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [
                { "event": "*", "schema": SCHEMA, "table": TABLE }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = json!(token);
    }
    json!({
        "topic": topic,
        "event": "phx_join",
        "payload": payload,
        "ref": JOIN_REF,
    })
}

fn heartbeat_frame(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

fn leave_frame(topic: &str, reference: u64) -> Value {
    json!({
        "topic": topic,
        "event": "phx_leave",
        "payload": {},
        "ref": reference.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

/// Translates one server frame for `topic` into an inbox message.
///
/// Frames for other topics, heartbeat replies and presence traffic yield `None`.
pub fn parse_frame(topic: &str, text: &str) -> Option<FeedMessage> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "ignoring malformed realtime frame");
            return None;
        }
    };
    if frame.topic != topic {
        return None;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(JOIN_REF) => {
            match frame.payload["status"].as_str() {
                Some("ok") => Some(FeedMessage::Confirmed(Ok(()))),
                _ => Some(FeedMessage::Confirmed(Err(format!(
                    "join refused: {}",
                    frame.payload["response"]
                )))),
            }
        }
        "postgres_changes" => change_from(&frame.payload["data"]).map(FeedMessage::Change),
        "phx_error" => Some(FeedMessage::Error("realtime channel error".to_string())),
        "phx_close" => Some(FeedMessage::Error("channel closed by server".to_string())),
        "system" if frame.payload["status"] == "error" => Some(FeedMessage::Error(
            frame.payload["message"]
                .as_str()
                .unwrap_or("realtime system error")
                .to_string(),
        )),
        _ => None,
    }
}

fn change_from(data: &Value) -> Option<ChangePayload> {
    let event_type = match data["type"].as_str()? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        other => {
            debug!(kind = other, "ignoring realtime change kind");
            return None;
        }
    };
    Some(ChangePayload {
        event_type,
        new: data.get("record").cloned().unwrap_or_else(|| json!({})),
        old: data.get("old_record").cloned().unwrap_or_else(|| json!({})),
    })
}

/// State owned by one channel's socket task.
struct ChannelSocket {
    endpoint: Url,
    topic: String,
    join: Value,
    heartbeat: Duration,
    inbox: mpsc::UnboundedSender<FeedMessage>,
}

impl ChannelSocket {
    async fn run(self, mut leave: oneshot::Receiver<()>) {
        let socket = tokio::select! {
            _ = &mut leave => return,
            connected = connect_async(self.endpoint.as_str()) => match connected {
                Ok((socket, _)) => socket,
                Err(err) => {
                    warn!(topic = %self.topic, error = %err, "realtime connect failed");
                    self.report(false, format!("connect failed: {}", err));
                    return;
                }
            },
        };
        let (mut sink, mut stream) = socket.split();

        if let Err(err) = sink.send(Message::text(self.join.to_string())).await {
            self.report(false, format!("join failed: {}", err));
            return;
        }
        info!(topic = %self.topic, "realtime join sent");

        let mut ticker = tokio::time::interval(self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        let mut next_ref: u64 = 2;
        let mut joined = false;

        loop {
            tokio::select! {
                _ = &mut leave => {
                    let frame = leave_frame(&self.topic, next_ref);
                    let _ = sink.send(Message::text(frame.to_string())).await;
                    let _ = sink.close().await;
                    debug!(topic = %self.topic, "realtime channel left");
                    return;
                }
                _ = ticker.tick() => {
                    let frame = heartbeat_frame(next_ref);
                    next_ref += 1;
                    if let Err(err) = sink.send(Message::text(frame.to_string())).await {
                        self.report(joined, format!("heartbeat failed: {}", err));
                        return;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let Some(message) = parse_frame(&self.topic, &text) else {
                            continue;
                        };
                        joined |= matches!(message, FeedMessage::Confirmed(Ok(())));
                        if self.inbox.send(message).is_err() {
                            // Subscriber is gone; wait for the release.
                            debug!(topic = %self.topic, "realtime inbox closed");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        self.report(joined, "realtime socket closed".to_string());
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        self.report(joined, format!("realtime socket error: {}", err));
                        return;
                    }
                },
            }
        }
    }

    /// Reports a failure as a refused join before confirmation, as a channel
    /// error after it.
    fn report(&self, joined: bool, reason: String) {
        let message = if joined {
            FeedMessage::Error(reason)
        } else {
            FeedMessage::Confirmed(Err(reason))
        };
        let _ = self.inbox.send(message);
    }
}
