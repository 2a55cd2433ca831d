//! App Core for marksync.
//!
//! Holds the settings, the storage backend and the change feed shared by every
//! session opened in this process.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::database::change_log::ChangeLogRelay;
use crate::database::connection::Database;
use crate::database::storage::LocalStorage;
use crate::managers::bookmark_session::{BookmarkSession, SessionConfig};
use crate::platform;
use crate::services::change_feed::{ChangeFeed, ChangeHub};
use crate::services::realtime::RealtimeFeed;
use crate::services::rest_storage::RestStorage;
use crate::services::settings_engine::{SettingsEngine, SettingsEngineTrait};
use crate::services::storage::BookmarkStorage;
use crate::types::bookmark::{Bookmark, DeleteOutcome, NewBookmark};
use crate::types::errors::StorageError;
use crate::types::settings::{StorageBackend, SyncSettings};

/// The backend selected by `storage.backend`.
pub enum AppStorage {
    Local(LocalStorage),
    Rest(RestStorage),
}

impl BookmarkStorage for AppStorage {
    async fn list(&self, owner: &str) -> Result<Vec<Bookmark>, StorageError> {
        match self {
            AppStorage::Local(s) => s.list(owner).await,
            AppStorage::Rest(s) => s.list(owner).await,
        }
    }

    async fn create(&self, new: NewBookmark) -> Result<Bookmark, StorageError> {
        match self {
            AppStorage::Local(s) => s.create(new).await,
            AppStorage::Rest(s) => s.create(new).await,
        }
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, StorageError> {
        match self {
            AppStorage::Local(s) => s.delete(id).await,
            AppStorage::Rest(s) => s.delete(id).await,
        }
    }
}

/// Central application struct.
pub struct App {
    pub settings_engine: SettingsEngine,
    storage: Arc<AppStorage>,
    feed: Arc<dyn ChangeFeed>,
    hub: Option<Arc<ChangeHub>>,
    relay: Option<ChangeLogRelay>,
}

impl App {
    /// Loads settings and opens the configured backend with its change feed.
    ///
    /// The local backend relays writes from other processes through the
    /// change log; the REST backend listens on the hosted realtime socket.
    /// Must be called from within a Tokio runtime.
    pub fn new(mut settings_engine: SettingsEngine) -> Result<Self, Box<dyn std::error::Error>> {
        let settings = settings_engine.load()?;
        let app = match settings.storage.backend {
            StorageBackend::Local => {
                let path = local_database_path(&settings);
                info!(path = %path.display(), "opening local storage");
                let hub = Arc::new(ChangeHub::new());
                let storage = LocalStorage::open(&path, Arc::clone(&hub))?;
                let every = Duration::from_millis(settings.realtime.poll_interval_ms.max(1));
                let relay =
                    ChangeLogRelay::spawn(&path, storage.origin(), Arc::clone(&hub), every)?;
                Self {
                    settings_engine,
                    storage: Arc::new(AppStorage::Local(storage)),
                    feed: hub.clone(),
                    hub: Some(hub),
                    relay: Some(relay),
                }
            }
            StorageBackend::Rest => {
                info!(url = %settings.storage.rest_url, "using rest storage");
                let storage = RestStorage::from_settings(&settings.storage)?;
                let feed = RealtimeFeed::from_settings(&settings.storage, &settings.realtime)?;
                info!(endpoint = %feed.endpoint(), "using hosted realtime");
                Self {
                    settings_engine,
                    storage: Arc::new(AppStorage::Rest(storage)),
                    feed: Arc::new(feed),
                    hub: None,
                    relay: None,
                }
            }
        };
        info!(config = app.settings_engine.get_config_path(), "app initialized");
        Ok(app)
    }

    /// Default settings with an in-memory SQLite database. Used by the demo and tests.
    pub fn in_memory() -> Result<Self, Box<dyn std::error::Error>> {
        let hub = Arc::new(ChangeHub::new());
        let storage = LocalStorage::new(Database::open_in_memory()?, Arc::clone(&hub));
        Ok(Self {
            settings_engine: SettingsEngine::with_settings(
                "settings.json".to_string(),
                SyncSettings::default(),
            ),
            storage: Arc::new(AppStorage::Local(storage)),
            feed: hub.clone(),
            hub: Some(hub),
            relay: None,
        })
    }

    pub fn storage(&self) -> &Arc<AppStorage> {
        &self.storage
    }

    /// The in-process hub, present for the local backend.
    pub fn hub(&self) -> Option<&Arc<ChangeHub>> {
        self.hub.as_ref()
    }

    /// True while writes from other processes are being relayed.
    pub fn relays_changes(&self) -> bool {
        self.relay.as_ref().is_some_and(ChangeLogRelay::is_running)
    }

    /// Starts a session for `owner` against this app's storage and change feed.
    pub async fn open_session(
        &self,
        owner: &str,
    ) -> Result<BookmarkSession<AppStorage>, StorageError> {
        let config = SessionConfig::from(self.settings_engine.get_settings());
        BookmarkSession::start(
            Arc::clone(&self.storage),
            Arc::clone(&self.feed),
            owner,
            config,
        )
        .await
    }
}

fn local_database_path(settings: &SyncSettings) -> PathBuf {
    settings
        .storage
        .sqlite_path
        .clone()
        .map(Into::into)
        .unwrap_or_else(platform::default_database_path)
}
