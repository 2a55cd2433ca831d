//! Validation and normalization of user-typed bookmark input.

use url::Url;

use crate::types::bookmark::NewBookmark;
use crate::types::errors::BookmarkError;

const RECOGNIZED_SCHEMES: [&str; 2] = ["http://", "https://"];

/// Raw form input for a new bookmark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookmarkDraft {
    pub title: String,
    pub url: String,
}

impl BookmarkDraft {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }

    /// Whether submission should be enabled: both fields non-blank.
    pub fn can_submit(&self) -> bool {
        !self.title.trim().is_empty() && !self.url.trim().is_empty()
    }

    /// Turns the draft into a create payload for `owner`, or explains why not.
    pub fn validate(
        &self,
        owner: &str,
        default_scheme: &str,
    ) -> Result<NewBookmark, BookmarkError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(BookmarkError::EmptyTitle);
        }
        let url = normalize_url(&self.url, default_scheme)?;
        Ok(NewBookmark {
            user_id: owner.to_string(),
            title: title.to_string(),
            url,
        })
    }
}

/// Trims `raw`, prepends `default_scheme` when it has no http(s) scheme, and
/// checks that the result parses as a URL.
///
/// The returned string is the prefixed input, not the parser's serialization,
/// so `example.com` becomes `https://example.com` without a trailing slash.
pub fn normalize_url(raw: &str, default_scheme: &str) -> Result<String, BookmarkError> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let candidate = if RECOGNIZED_SCHEMES.iter().any(|s| lowered.starts_with(s)) {
        trimmed.to_string()
    } else {
        format!("{}{}", default_scheme, trimmed)
    };

    match Url::parse(&candidate) {
        Ok(parsed) if parsed.has_host() => Ok(candidate),
        _ => Err(BookmarkError::InvalidUrl(trimmed.to_string())),
    }
}
