//! Tests for the hosted realtime feed.
//!
//! Frame parsing is checked directly. Channel lifecycles run against a small
//! websocket server on a local port that answers joins and broadcasts row
//! changes to every joined socket, the way the hosted service fans out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use marksync::managers::bookmark_store::BookmarkStore;
use marksync::managers::change_feed_subscriber::ChangeFeedSubscriber;
use marksync::services::change_feed::ChangeFeed;
use marksync::services::realtime::{join_frame, parse_frame, socket_url, topic_for, RealtimeFeed};
use marksync::types::bookmark::Bookmark;
use marksync::types::change::{ChangeKind, ConnectionStatus, FeedMessage};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const TOPIC: &str = "realtime:bookmarks-alice-1";

fn bookmark(id: &str, owner: &str) -> Bookmark {
    let now = Utc::now();
    Bookmark {
        id: id.to_string(),
        owner: owner.to_string(),
        title: format!("Title {}", id),
        url: format!("https://{}.example.com", id),
        created_at: now,
        updated_at: now,
    }
}

fn frame(topic: &str, event: &str, payload: Value, reference: Value) -> String {
    json!({"topic": topic, "event": event, "payload": payload, "ref": reference}).to_string()
}

// ---------------------------------------------------------------------------
// Url and frames
// ---------------------------------------------------------------------------

#[test]
fn test_socket_url_follows_rest_url() {
    let url = socket_url("https://project.example.co", "anon-key").unwrap();
    assert_eq!(
        url.as_str(),
        "wss://project.example.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
    );

    let local = socket_url("http://localhost:54321", "k").unwrap();
    assert_eq!(local.scheme(), "ws");
    assert_eq!(local.port(), Some(54321));

    assert!(socket_url("ftp://example.com", "k").is_err());
    assert!(socket_url("not a url", "k").is_err());
}

#[test]
fn test_join_frame_requests_all_bookmark_changes() {
    let join = join_frame(TOPIC, Some("user-jwt"));
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], TOPIC);
    assert_eq!(join["payload"]["access_token"], "user-jwt");
    assert_eq!(
        join["payload"]["config"]["postgres_changes"][0],
        json!({"event": "*", "schema": "public", "table": "bookmarks"})
    );

    let anonymous = join_frame(TOPIC, None);
    assert!(anonymous["payload"].get("access_token").is_none());
}

#[test]
fn test_parse_join_replies() {
    let ok = frame(TOPIC, "phx_reply", json!({"status": "ok", "response": {}}), json!("1"));
    assert_eq!(parse_frame(TOPIC, &ok), Some(FeedMessage::Confirmed(Ok(()))));

    let refused = frame(
        TOPIC,
        "phx_reply",
        json!({"status": "error", "response": {"reason": "unauthorized"}}),
        json!("1"),
    );
    assert!(matches!(
        parse_frame(TOPIC, &refused),
        Some(FeedMessage::Confirmed(Err(reason))) if reason.contains("unauthorized")
    ));

    let heartbeat = frame("phoenix", "phx_reply", json!({"status": "ok"}), json!("2"));
    assert_eq!(parse_frame(TOPIC, &heartbeat), None);
}

#[test]
fn test_parse_row_changes() {
    let record = bookmark("bk-1", "alice");
    let insert = frame(
        TOPIC,
        "postgres_changes",
        json!({"data": {"type": "INSERT", "record": record, "old_record": {}}}),
        Value::Null,
    );
    match parse_frame(TOPIC, &insert) {
        Some(FeedMessage::Change(payload)) => {
            assert_eq!(payload.event_type, ChangeKind::Insert);
            assert_eq!(payload.new["id"], "bk-1");
        }
        other => panic!("expected a change, got {:?}", other),
    }

    let delete = frame(
        TOPIC,
        "postgres_changes",
        json!({"data": {"type": "DELETE", "old_record": {"id": "bk-1"}}}),
        Value::Null,
    );
    match parse_frame(TOPIC, &delete) {
        Some(FeedMessage::Change(payload)) => {
            assert_eq!(payload.event_type, ChangeKind::Delete);
            assert_eq!(payload.old, json!({"id": "bk-1"}));
        }
        other => panic!("expected a change, got {:?}", other),
    }
}

#[test]
fn test_parse_ignores_other_topics_and_noise() {
    let other = frame("realtime:someone-else", "phx_error", json!({}), Value::Null);
    assert_eq!(parse_frame(TOPIC, &other), None);
    assert_eq!(parse_frame(TOPIC, "not json"), None);
    let presence = frame(TOPIC, "presence_state", json!({}), Value::Null);
    assert_eq!(parse_frame(TOPIC, &presence), None);

    let closed = frame(TOPIC, "phx_close", json!({}), Value::Null);
    assert!(matches!(parse_frame(TOPIC, &closed), Some(FeedMessage::Error(_))));
}

// ---------------------------------------------------------------------------
// Against a local realtime server
// ---------------------------------------------------------------------------

struct FakeRealtime {
    rest_url: String,
    changes: broadcast::Sender<Value>,
    received: mpsc::UnboundedReceiver<Value>,
}

impl FakeRealtime {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (changes, _) = broadcast::channel::<Value>(16);
        let (received_tx, received) = mpsc::unbounded_channel();

        let fanout = changes.clone();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let mut pushes = fanout.subscribe();
                let received = received_tx.clone();
                tokio::spawn(async move {
                    let Ok(socket) = accept_async(tcp).await else {
                        return;
                    };
                    let (mut sink, mut stream) = socket.split();
                    let mut topic = String::new();
                    loop {
                        tokio::select! {
                            incoming = stream.next() => {
                                let Some(Ok(Message::Text(text))) = incoming else {
                                    return;
                                };
                                let value: Value = serde_json::from_str(&text).unwrap();
                                if value["event"] == "phx_join" {
                                    topic = value["topic"].as_str().unwrap().to_string();
                                    let reply = frame(
                                        &topic,
                                        "phx_reply",
                                        json!({"status": "ok", "response": {}}),
                                        value["ref"].clone(),
                                    );
                                    sink.send(Message::text(reply)).await.unwrap();
                                }
                                let _ = received.send(value);
                            }
                            Ok(data) = pushes.recv() => {
                                let change = frame(
                                    &topic,
                                    "postgres_changes",
                                    json!({"data": data, "ids": [1]}),
                                    Value::Null,
                                );
                                if sink.send(Message::text(change)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            rest_url: format!("http://{}", addr),
            changes,
            received,
        }
    }

    fn feed(&self) -> Arc<RealtimeFeed> {
        Arc::new(RealtimeFeed::new(
            socket_url(&self.rest_url, "anon-key").unwrap(),
            Some("user-jwt".to_string()),
        ))
    }

    /// Next frame a client sent with the given event name.
    async fn next_sent(&mut self, event: &str) -> Value {
        let wait = async {
            loop {
                let value = self.received.recv().await.expect("server stopped");
                if value["event"] == event {
                    return value;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .expect("frame not received in time")
    }
}

/// Waits for one inbox message and applies it.
async fn step(sub: &mut ChangeFeedSubscriber, store: &mut BookmarkStore) {
    let message = tokio::time::timeout(Duration::from_secs(2), sub.next_message())
        .await
        .expect("no realtime message in time")
        .expect("inbox closed");
    sub.handle(message, store);
}

#[tokio::test]
async fn test_join_confirms_and_reports_subscribed() {
    let mut server = FakeRealtime::start().await;
    let mut sub = ChangeFeedSubscriber::open(server.feed(), "alice", "bookmarks");
    let mut store = BookmarkStore::new();
    assert_eq!(sub.status(), ConnectionStatus::Connecting);

    step(&mut sub, &mut store).await;

    assert_eq!(sub.status(), ConnectionStatus::Subscribed);
    let join = server.next_sent("phx_join").await;
    assert_eq!(join["topic"], topic_for(sub.channel().unwrap()));
    assert_eq!(join["payload"]["access_token"], "user-jwt");
}

/// Two feeds stand for two processes: a change broadcast by the service
/// reaches both, and each applies it under its own owner filter.
#[tokio::test]
async fn test_separate_feeds_receive_inserts_and_deletes() {
    let server = FakeRealtime::start().await;
    let mut laptop = ChangeFeedSubscriber::open(server.feed(), "alice", "bookmarks");
    let mut phone = ChangeFeedSubscriber::open(server.feed(), "alice", "bookmarks");
    let mut other = ChangeFeedSubscriber::open(server.feed(), "bob", "bookmarks");
    let mut laptop_store = BookmarkStore::new();
    let mut phone_store = BookmarkStore::new();
    let mut other_store = BookmarkStore::new();
    step(&mut laptop, &mut laptop_store).await;
    step(&mut phone, &mut phone_store).await;
    step(&mut other, &mut other_store).await;

    let record = bookmark("bk-7", "alice");
    server
        .changes
        .send(json!({"type": "INSERT", "record": record, "old_record": {}}))
        .unwrap();
    step(&mut laptop, &mut laptop_store).await;
    step(&mut phone, &mut phone_store).await;
    step(&mut other, &mut other_store).await;

    assert_eq!(laptop_store.ids(), vec!["bk-7".to_string()]);
    assert_eq!(phone_store.ids(), vec!["bk-7".to_string()]);
    assert!(other_store.is_empty());

    server
        .changes
        .send(json!({"type": "DELETE", "record": {}, "old_record": {"id": "bk-7"}}))
        .unwrap();
    step(&mut laptop, &mut laptop_store).await;
    step(&mut phone, &mut phone_store).await;

    assert!(laptop_store.is_empty());
    assert!(phone_store.is_empty());
}

#[tokio::test]
async fn test_teardown_leaves_the_channel() {
    let mut server = FakeRealtime::start().await;
    let feed = server.feed();
    let mut sub = ChangeFeedSubscriber::open(feed.clone(), "alice", "bookmarks");
    let mut store = BookmarkStore::new();
    step(&mut sub, &mut store).await;
    let topic = topic_for(sub.channel().unwrap());
    assert_eq!(feed.active_channels().len(), 1);

    sub.teardown();

    let leave = server.next_sent("phx_leave").await;
    assert_eq!(leave["topic"], topic);
    assert!(feed.active_channels().is_empty());
    assert_eq!(sub.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn test_unreachable_service_reports_error() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = socket_url(&format!("http://{}", addr), "anon-key").unwrap();
    let feed = Arc::new(RealtimeFeed::new(url, None));
    let mut sub = ChangeFeedSubscriber::open(feed, "alice", "bookmarks");
    let mut store = BookmarkStore::new();

    step(&mut sub, &mut store).await;
    assert_eq!(sub.status(), ConnectionStatus::Error);
    assert_eq!(sub.status().label(), "Disconnected");
}

#[test]
fn test_subscribe_outside_runtime_fails_cleanly() {
    let url = socket_url("http://localhost:54321", "anon-key").unwrap();
    let feed = RealtimeFeed::new(url, None);
    assert!(feed.subscribe("bookmarks-alice-1").is_err());
    assert!(feed.active_channels().is_empty());
}
