use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// A saved bookmark row as the storage backend returns it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Bookmark {
    /// Host name without a leading `www.`, or the raw url when it does not parse.
    pub fn domain(&self) -> String {
        match Url::parse(&self.url).ok().and_then(|u| u.host_str().map(str::to_string)) {
            Some(host) => host.strip_prefix("www.").unwrap_or(&host).to_string(),
            None => self.url.clone(),
        }
    }

    /// Favicon lookup url for the bookmark's host.
    pub fn favicon_url(&self) -> Option<String> {
        let parsed = Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        Some(format!(
            "https://www.google.com/s2/favicons?domain={}&sz=32",
            host
        ))
    }

    /// Case-insensitive substring match on title or url.
    /// `needle` must already be lowercased.
    pub(crate) fn matches_lowercase(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle) || self.url.to_lowercase().contains(needle)
    }
}

/// Payload for creating a bookmark. The backend assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewBookmark {
    pub user_id: String,
    pub title: String,
    pub url: String,
}

/// Result of a remote delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}
