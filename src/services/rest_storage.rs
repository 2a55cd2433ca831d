//! Storage client for the hosted database's REST interface (PostgREST dialect).
//!
//! Row-level authorization is enforced server-side from the bearer token; this
//! client only shapes requests and maps responses. Change events for these
//! writes come back over the realtime socket.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::debug;
use url::Url;

use crate::services::storage::BookmarkStorage;
use crate::types::bookmark::{Bookmark, DeleteOutcome, NewBookmark};
use crate::types::errors::StorageError;
use crate::types::settings::StorageSettings;

const TABLE_PATH: &str = "rest/v1/bookmarks";

/// REST storage client.
pub struct RestStorage {
    client: Client,
    table_url: Url,
    api_key: String,
    access_token: Option<String>,
}

impl RestStorage {
    pub fn new(
        base_url: &str,
        api_key: &str,
        access_token: Option<&str>,
    ) -> Result<Self, StorageError> {
        let invalid = |e: url::ParseError| {
            StorageError::Network(format!("invalid base url {}: {}", base_url, e))
        };
        let mut base = Url::parse(base_url).map_err(invalid)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let table_url = base.join(TABLE_PATH).map_err(invalid)?;
        Ok(Self {
            client: Client::new(),
            table_url,
            api_key: api_key.to_string(),
            access_token: access_token.map(str::to_string),
        })
    }

    pub fn from_settings(settings: &StorageSettings) -> Result<Self, StorageError> {
        Self::new(
            &settings.rest_url,
            &settings.api_key,
            settings.access_token.as_deref(),
        )
    }

    /// Replaces the HTTP client, e.g. one with custom timeouts or proxy rules.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn table_url(&self) -> &Url {
        &self.table_url
    }

    /// `GET` url for an owner's bookmarks, newest first.
    pub fn list_url(&self, owner: &str) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{}", owner))
            .append_pair("order", "created_at.desc");
        url
    }

    /// `DELETE` url targeting one row.
    pub fn delete_url(&self, id: &str) -> Url {
        let mut url = self.table_url.clone();
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
        url
    }

    /// Headers sent with every request.
    pub fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&self.api_key) {
            headers.insert("apikey", value);
        }
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.headers(self.auth_headers())
    }

    async fn send_for_rows(&self, request: RequestBuilder) -> Result<Vec<Bookmark>, StorageError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        response
            .json::<Vec<Bookmark>>()
            .await
            .map_err(|e| StorageError::Decode(e.to_string()))
    }
}

impl BookmarkStorage for RestStorage {
    async fn list(&self, owner: &str) -> Result<Vec<Bookmark>, StorageError> {
        let request = self.client.get(self.list_url(owner));
        self.send_for_rows(request).await
    }

    async fn create(&self, new: NewBookmark) -> Result<Bookmark, StorageError> {
        let request = self
            .client
            .post(self.table_url.clone())
            .header("Prefer", "return=representation")
            .json(&new);
        let record = self
            .send_for_rows(request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::Decode("create returned no rows".to_string()))?;
        debug!(id = %record.id, "bookmark created remotely");
        Ok(record)
    }

    async fn delete(&self, id: &str) -> Result<DeleteOutcome, StorageError> {
        let request = self
            .client
            .delete(self.delete_url(id))
            .header("Prefer", "return=representation");
        let rows = self.send_for_rows(request).await?;
        if rows.is_empty() {
            return Ok(DeleteOutcome::NotFound);
        }
        debug!(id, "bookmark deleted remotely");
        Ok(DeleteOutcome::Deleted)
    }
}

/// Maps a non-success HTTP status to a storage error.
/// Client errors mean the backend refused the request; anything else is transport trouble.
pub fn status_error(status: StatusCode, body: &str) -> StorageError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };
    if status.is_client_error() {
        StorageError::Rejected(detail)
    } else {
        StorageError::Network(detail)
    }
}
