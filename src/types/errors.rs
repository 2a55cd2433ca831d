use std::fmt;

// === StorageError ===

/// Errors reported by a storage backend.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Local database operation failed.
    Database(String),
    /// The remote backend could not be reached.
    Network(String),
    /// The backend refused the write (constraint or authorization failure).
    Rejected(String),
    /// The backend answered with something that could not be decoded.
    Decode(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Database(msg) => write!(f, "Storage database error: {}", msg),
            StorageError::Network(msg) => write!(f, "Storage network error: {}", msg),
            StorageError::Rejected(msg) => write!(f, "Storage rejected request: {}", msg),
            StorageError::Decode(msg) => write!(f, "Storage decode error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

// === BookmarkError ===

/// Errors surfaced by the add and delete workflows.
#[derive(Debug, Clone, PartialEq)]
pub enum BookmarkError {
    /// The title was empty after trimming.
    EmptyTitle,
    /// The url could not be parsed even after normalization.
    InvalidUrl(String),
    /// The storage backend failed the request.
    Storage(StorageError),
    /// The remote delete failed after the bookmark was already removed locally.
    DeleteUncertain { id: String, source: StorageError },
    /// The session has ended.
    SessionClosed,
}

impl fmt::Display for BookmarkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookmarkError::EmptyTitle => write!(f, "Bookmark title cannot be empty"),
            BookmarkError::InvalidUrl(url) => write!(f, "Please enter a valid URL: {}", url),
            BookmarkError::Storage(err) => write!(f, "{}", err),
            BookmarkError::DeleteUncertain { id, source } => write!(
                f,
                "Bookmark {} was removed here but the server delete failed ({}); \
                 it may reappear after reload",
                id, source
            ),
            BookmarkError::SessionClosed => write!(f, "Bookmark session is closed"),
        }
    }
}

impl std::error::Error for BookmarkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookmarkError::Storage(err) => Some(err),
            BookmarkError::DeleteUncertain { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<StorageError> for BookmarkError {
    fn from(err: StorageError) -> Self {
        BookmarkError::Storage(err)
    }
}

// === FeedError ===

/// Errors related to change-feed subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedError {
    /// The feed refused to open the channel.
    SubscribeFailed(String),
}

impl fmt::Display for FeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedError::SubscribeFailed(msg) => write!(f, "Change feed subscribe failed: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    IoError(String),
    /// Failed to serialize or deserialize settings.
    SerializationError(String),
    /// The provided settings key is invalid.
    InvalidKey(String),
    /// The provided settings value is invalid.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => {
                write!(f, "Invalid settings value: {}", msg)
            }
        }
    }
}

impl std::error::Error for SettingsError {}
