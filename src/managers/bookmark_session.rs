//! Bookmark session.
//!
//! One session per signed-in owner: it owns the local store and the change-feed
//! subscriber, and runs the add and delete workflows against the storage
//! backend. All store mutation happens through `&mut self`, so it is confined to
//! whichever task drives the session.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::managers::bookmark_store::{
    BookmarkStore, BookmarkStoreTrait, ObserverId, StoreChange,
};
use crate::managers::change_feed_subscriber::{ChangeFeedSubscriber, EventOutcome};
use crate::services::bookmark_draft::BookmarkDraft;
use crate::services::change_feed::ChangeFeed;
use crate::services::storage::BookmarkStorage;
use crate::types::bookmark::{Bookmark, DeleteOutcome};
use crate::types::change::ConnectionStatus;
use crate::types::errors::{BookmarkError, StorageError};
use crate::types::settings::SyncSettings;

/// Per-session knobs taken from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub channel_prefix: String,
    pub default_scheme: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SessionConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            channel_prefix: settings.realtime.channel_prefix.clone(),
            default_scheme: settings.bookmarks.default_scheme.clone(),
        }
    }
}

/// A remote delete running in the background.
///
/// Dropping it leaves the request running; awaiting [`PendingDelete::outcome`]
/// reports how it ended.
pub struct PendingDelete {
    id: String,
    handle: JoinHandle<Result<DeleteOutcome, BookmarkError>>,
}

impl PendingDelete {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn outcome(self) -> Result<DeleteOutcome, BookmarkError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_err) => Err(BookmarkError::DeleteUncertain {
                id: self.id,
                source: StorageError::Network(join_err.to_string()),
            }),
        }
    }
}

pub struct BookmarkSession<S: BookmarkStorage> {
    storage: Arc<S>,
    feed: Arc<dyn ChangeFeed>,
    config: SessionConfig,
    owner: String,
    store: BookmarkStore,
    subscriber: Option<ChangeFeedSubscriber>,
    status: Arc<watch::Sender<ConnectionStatus>>,
    ended: bool,
}

impl<S: BookmarkStorage> BookmarkSession<S> {
    /// Seeds the store from `list(owner)`, then subscribes to the owner's channel.
    pub async fn start(
        storage: Arc<S>,
        feed: Arc<dyn ChangeFeed>,
        owner: &str,
        config: SessionConfig,
    ) -> Result<Self, StorageError> {
        let (status, _) = watch::channel(ConnectionStatus::Connecting);
        let mut session = Self {
            storage,
            feed,
            config,
            owner: owner.to_string(),
            store: BookmarkStore::new(),
            subscriber: None,
            status: Arc::new(status),
            ended: false,
        };
        session.seed_and_subscribe().await?;
        Ok(session)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    /// Filtered newest-first view; empty `term` returns everything.
    pub fn query(&self, term: &str) -> Vec<Bookmark> {
        self.store.query(term)
    }

    pub fn on_change<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&StoreChange) + Send + 'static,
    {
        self.store.on_change(callback)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.store.remove_observer(id)
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Status receiver that stays valid across owner switches and reloads.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Name of the current realtime channel, if one is open.
    pub fn channel(&self) -> Option<&str> {
        self.subscriber.as_ref().and_then(|s| s.channel())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Applies every change-feed message already delivered.
    pub fn process_pending(&mut self) -> usize {
        match self.subscriber.as_mut() {
            Some(subscriber) => subscriber.process_pending(&mut self.store),
            None => 0,
        }
    }

    /// Waits for the next change-feed message and applies it.
    /// `None` once there is no live subscription.
    pub async fn next_event(&mut self) -> Option<EventOutcome> {
        let subscriber = self.subscriber.as_mut()?;
        let message = subscriber.next_message().await?;
        Some(subscriber.handle(message, &mut self.store))
    }

    /// Validates input, creates the bookmark remotely and shows it locally.
    ///
    /// Nothing is written when validation fails, and nothing changes locally
    /// when the create fails. The later change-feed echo is a no-op.
    pub async fn add_bookmark(
        &mut self,
        title: &str,
        url: &str,
    ) -> Result<Bookmark, BookmarkError> {
        if self.ended {
            return Err(BookmarkError::SessionClosed);
        }
        let new =
            BookmarkDraft::new(title, url).validate(&self.owner, &self.config.default_scheme)?;

        let record = match self.storage.create(new).await {
            Ok(record) => record,
            Err(err) => {
                warn!(owner = %self.owner, error = %err, "insert error");
                return Err(err.into());
            }
        };

        self.store.insert(record.clone());
        Ok(record)
    }

    /// Removes the bookmark locally, then deletes it remotely in the background.
    ///
    /// A failed remote delete is not rolled back locally; the bookmark stays
    /// hidden until the next reload shows whether it still exists. The request
    /// outlives the session if the session ends first.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn delete_bookmark(&mut self, id: &str) -> Result<PendingDelete, BookmarkError> {
        if self.ended {
            return Err(BookmarkError::SessionClosed);
        }
        self.store.remove(id);

        let storage = Arc::clone(&self.storage);
        let task_id = id.to_string();
        let handle = tokio::spawn(async move {
            match storage.delete(&task_id).await {
                Ok(outcome) => {
                    debug!(id = %task_id, ?outcome, "remote delete finished");
                    Ok(outcome)
                }
                Err(source) => {
                    warn!(
                        id = %task_id,
                        error = %source,
                        "error deleting bookmark; remote state uncertain"
                    );
                    Err(BookmarkError::DeleteUncertain { id: task_id, source })
                }
            }
        });

        Ok(PendingDelete {
            id: id.to_string(),
            handle,
        })
    }

    /// Re-seeds from storage and opens a fresh channel. This is the recovery
    /// path after a channel error.
    pub async fn reload(&mut self) -> Result<(), StorageError> {
        if self.ended {
            return Ok(());
        }
        self.release_subscription();
        self.seed_and_subscribe().await
    }

    /// Moves the session to another owner: releases the old channel, clears
    /// the store, then seeds and subscribes for `owner`.
    pub async fn switch_owner(&mut self, owner: &str) -> Result<(), StorageError> {
        if self.ended || owner == self.owner {
            return Ok(());
        }
        info!(from = %self.owner, to = owner, "switching session owner");
        self.release_subscription();
        self.store.seed(Vec::new());
        self.owner = owner.to_string();
        self.seed_and_subscribe().await
    }

    /// Ends the session and releases its channel. Later calls do nothing.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        self.release_subscription();
        self.ended = true;
        info!(owner = %self.owner, "session ended");
    }

    async fn seed_and_subscribe(&mut self) -> Result<(), StorageError> {
        let snapshot = match self.storage.list(&self.owner).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(owner = %self.owner, error = %err, "error fetching bookmarks");
                return Err(err);
            }
        };
        self.store.seed(snapshot);
        self.subscriber = Some(ChangeFeedSubscriber::open_shared(
            Arc::clone(&self.feed),
            &self.owner,
            &self.config.channel_prefix,
            Arc::clone(&self.status),
        ));
        Ok(())
    }

    fn release_subscription(&mut self) {
        if let Some(mut subscriber) = self.subscriber.take() {
            subscriber.teardown();
        }
    }
}

impl<S: BookmarkStorage> Drop for BookmarkSession<S> {
    fn drop(&mut self) {
        self.end();
    }
}
