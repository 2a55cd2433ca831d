//! Change-feed subscriber.
//!
//! Owns one channel on a [`ChangeFeed`] for one owner, turns inbound row changes
//! into store mutations and publishes the connection status. The channel is
//! released exactly once: on `teardown`, or on drop if teardown never ran.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::managers::bookmark_store::BookmarkStoreTrait;
use crate::services::change_feed::ChangeFeed;
use crate::types::bookmark::Bookmark;
use crate::types::change::{ChangeKind, ChangePayload, ConnectionStatus, FeedMessage};

/// What handling one inbox message amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The store changed.
    Applied,
    /// Valid event that left the store as it was (echo, absent id).
    NoOp,
    /// Dropped: foreign owner, unparsable image, or subscriber closed.
    Discarded,
    /// A status message; the store was not touched.
    Status,
}

pub struct ChangeFeedSubscriber {
    feed: Arc<dyn ChangeFeed>,
    owner: String,
    channel: Option<String>,
    inbox: Option<mpsc::UnboundedReceiver<FeedMessage>>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    closed: bool,
}

impl ChangeFeedSubscriber {
    /// Opens a fresh channel `<prefix>-<owner>-<uuid>` for `owner`.
    ///
    /// A refused subscribe does not fail: the subscriber starts in `Error`
    /// with nothing to release.
    pub fn open(feed: Arc<dyn ChangeFeed>, owner: &str, prefix: &str) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        Self::open_shared(feed, owner, prefix, Arc::new(status))
    }

    /// Like [`open`](Self::open), but publishes status on a channel shared with
    /// earlier subscribers, so watchers survive resubscription.
    pub fn open_shared(
        feed: Arc<dyn ChangeFeed>,
        owner: &str,
        prefix: &str,
        status: Arc<watch::Sender<ConnectionStatus>>,
    ) -> Self {
        let name = format!("{}-{}-{}", prefix, owner, Uuid::new_v4());
        info!(owner, channel = %name, "setting up realtime subscription");

        let mut subscriber = Self {
            feed,
            owner: owner.to_string(),
            channel: None,
            inbox: None,
            status,
            closed: false,
        };
        subscriber.set_status(ConnectionStatus::Connecting);

        match subscriber.feed.subscribe(&name) {
            Ok(subscription) => {
                subscriber.channel = Some(subscription.channel);
                subscriber.inbox = Some(subscription.inbox);
            }
            Err(err) => {
                warn!(owner, error = %err, "realtime subscribe failed");
                subscriber.set_status(ConnectionStatus::Error);
            }
        }
        subscriber
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Name of the open channel, `None` once torn down or if subscribe failed.
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// True once torn down. Tracked locally since the status channel may be
    /// shared with a newer subscriber.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Waits for the next inbox message. `None` when closed or the feed hung up.
    pub async fn next_message(&mut self) -> Option<FeedMessage> {
        match self.inbox.as_mut() {
            Some(inbox) => inbox.recv().await,
            None => None,
        }
    }

    /// Applies every message already delivered, without waiting.
    /// Returns how many messages were handled.
    pub fn process_pending<S: BookmarkStoreTrait>(&mut self, store: &mut S) -> usize {
        let mut handled = 0;
        loop {
            let message = match self.inbox.as_mut().map(|inbox| inbox.try_recv()) {
                Some(Ok(message)) => message,
                _ => break,
            };
            self.handle(message, store);
            handled += 1;
        }
        handled
    }

    /// Handles one inbox message in delivery order.
    pub fn handle<S: BookmarkStoreTrait>(
        &mut self,
        message: FeedMessage,
        store: &mut S,
    ) -> EventOutcome {
        if self.is_closed() {
            return EventOutcome::Discarded;
        }
        match message {
            FeedMessage::Confirmed(Ok(())) => {
                if self.status() == ConnectionStatus::Connecting {
                    info!(channel = ?self.channel, "realtime subscribed");
                    self.set_status(ConnectionStatus::Subscribed);
                }
                EventOutcome::Status
            }
            FeedMessage::Confirmed(Err(reason)) | FeedMessage::Error(reason) => {
                warn!(channel = ?self.channel, %reason, "realtime channel error");
                self.set_status(ConnectionStatus::Error);
                EventOutcome::Status
            }
            FeedMessage::Change(payload) => self.apply_change(payload, store),
        }
    }

    /// Releases the channel and moves to `Closed`. Later calls do nothing.
    pub fn teardown(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Some(channel) = self.channel.take() {
            info!(%channel, "cleaning up realtime");
            self.feed.unsubscribe(&channel);
        }
        self.inbox = None;
        self.closed = true;
        self.set_status(ConnectionStatus::Closed);
    }

    fn apply_change<S: BookmarkStoreTrait>(
        &self,
        payload: ChangePayload,
        store: &mut S,
    ) -> EventOutcome {
        debug!(kind = ?payload.event_type, "realtime event");
        match payload.event_type {
            ChangeKind::Insert => match self.owned_post_image(&payload.new) {
                Some(record) => outcome(store.insert(record)),
                None => EventOutcome::Discarded,
            },
            ChangeKind::Update => match self.owned_post_image(&payload.new) {
                Some(record) => outcome(store.update(record)),
                None => EventOutcome::Discarded,
            },
            ChangeKind::Delete => match payload.old.get("id").and_then(Value::as_str) {
                Some(id) => outcome(store.remove(id)),
                None => {
                    warn!("delete event without an id in its pre-image");
                    EventOutcome::Discarded
                }
            },
        }
    }

    /// Parses a post-image and keeps it only if it belongs to this owner.
    fn owned_post_image(&self, image: &Value) -> Option<Bookmark> {
        let record: Bookmark = match serde_json::from_value(image.clone()) {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "discarding unparsable post-image");
                return None;
            }
        };
        if record.owner != self.owner {
            debug!(id = %record.id, "discarding event for another owner");
            return None;
        }
        Some(record)
    }

    fn set_status(&self, next: ConnectionStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

impl Drop for ChangeFeedSubscriber {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn outcome(changed: bool) -> EventOutcome {
    if changed {
        EventOutcome::Applied
    } else {
        EventOutcome::NoOp
    }
}
