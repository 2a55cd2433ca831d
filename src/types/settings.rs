use serde::{Deserialize, Serialize};

/// Top-level settings container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncSettings {
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub bookmarks: BookmarkSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Which storage backend to use and how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// SQLite file path. `None` means the platform data directory.
    pub sqlite_path: Option<String>,
    pub rest_url: String,
    pub api_key: String,
    pub access_token: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            sqlite_path: None,
            rest_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            access_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Local,
    Rest,
}

/// Change-feed subscription settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RealtimeSettings {
    pub channel_prefix: String,
    /// How often the local backend checks the change log for writes made by
    /// other processes.
    pub poll_interval_ms: u64,
    /// Heartbeat period on the hosted realtime socket.
    pub heartbeat_secs: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            channel_prefix: "bookmarks".to_string(),
            poll_interval_ms: 250,
            heartbeat_secs: 25,
        }
    }
}

/// Add-workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookmarkSettings {
    /// Scheme prepended to urls typed without one.
    pub default_scheme: String,
}

impl Default for BookmarkSettings {
    fn default() -> Self {
        Self {
            default_scheme: "https://".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `info` or `marksync=debug`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
