//! Storage contract over the `bookmarks` table.

use std::future::Future;

use crate::types::bookmark::{Bookmark, DeleteOutcome, NewBookmark};
use crate::types::errors::StorageError;

/// Trait defining the row-oriented storage collaborator.
///
/// Implementations are shared through `Arc` and their futures must be `Send`
/// so deletes can run as detached tasks.
pub trait BookmarkStorage: Send + Sync + 'static {
    /// All bookmarks of `owner`, newest first by `created_at`.
    fn list(&self, owner: &str) -> impl Future<Output = Result<Vec<Bookmark>, StorageError>> + Send;

    /// Creates a row; the backend assigns id and timestamps.
    fn create(
        &self,
        new: NewBookmark,
    ) -> impl Future<Output = Result<Bookmark, StorageError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<DeleteOutcome, StorageError>> + Send;
}
