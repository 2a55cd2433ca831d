use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::bookmark::Bookmark;

/// Kind of row change carried by a feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change as delivered on the wire.
///
/// `new` holds the post-image (absent for deletes) and `old` the pre-image,
/// which for deletes usually carries nothing but the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangePayload {
    #[serde(rename = "eventType")]
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl ChangePayload {
    pub fn insert(record: &Bookmark) -> Self {
        Self {
            event_type: ChangeKind::Insert,
            new: json!(record),
            old: json!({}),
        }
    }

    pub fn update(record: &Bookmark) -> Self {
        Self {
            event_type: ChangeKind::Update,
            new: json!(record),
            old: json!({ "id": record.id }),
        }
    }

    pub fn delete(id: &str) -> Self {
        Self {
            event_type: ChangeKind::Delete,
            new: json!({}),
            old: json!({ "id": id }),
        }
    }
}

/// Message delivered on a subscription inbox.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// Answer to the subscribe request: `Ok` once the channel is live.
    Confirmed(Result<(), String>),
    Change(ChangePayload),
    /// The channel failed after it was confirmed.
    Error(String),
}

/// Connection health of a change-feed subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Subscribed,
    Error,
    Closed,
}

impl ConnectionStatus {
    /// Short text shown next to the bookmark count.
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Subscribed => "Live",
            ConnectionStatus::Error => "Disconnected",
            ConnectionStatus::Closed => "Closed",
        }
    }
}
