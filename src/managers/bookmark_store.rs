//! Local bookmark store.
//!
//! Holds one session's ordered, newest-first view of its owner's bookmarks.
//! Every mutation is idempotent so the optimistic local path and the change-feed
//! echo of the same write can arrive in either order. Consumers register
//! observers and re-derive their filtered view when the store changes.

use std::collections::HashSet;

use serde::Serialize;

use crate::types::bookmark::Bookmark;

/// Trait defining local store operations.
pub trait BookmarkStoreTrait {
    /// Replaces the contents with a snapshot, keeping its order.
    fn seed(&mut self, records: Vec<Bookmark>);
    /// Adds at the head. Returns `false` when the id is already present.
    fn insert(&mut self, record: Bookmark) -> bool;
    /// Returns `false` when the id is absent.
    fn remove(&mut self, id: &str) -> bool;
    /// Replaces the record in place. Returns `false` when the id is absent
    /// or the stored record is already identical.
    fn update(&mut self, record: Bookmark) -> bool;
    /// Records whose title or url contain `term`, ignoring case.
    fn query(&self, term: &str) -> Vec<Bookmark>;
}

/// Identifies a registered observer.
pub type ObserverId = u64;

/// What a store mutation did. Sent to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StoreChange {
    Seeded { count: usize },
    Inserted(String),
    Updated(String),
    Removed(String),
}

type Observer = Box<dyn FnMut(&StoreChange) + Send>;

/// In-memory ordered bookmark collection.
#[derive(Default)]
pub struct BookmarkStore {
    records: Vec<Bookmark>,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: ObserverId,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback fired after every effective mutation.
    pub fn on_change<F>(&mut self, callback: F) -> ObserverId
    where
        F: FnMut(&StoreChange) + Send + 'static,
    {
        let id = self.next_observer;
        self.next_observer += 1;
        self.observers.push((id, Box::new(callback)));
        id
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn get(&self, id: &str) -> Option<&Bookmark> {
        self.records.iter().find(|b| b.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Ids in display order.
    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|b| b.id.clone()).collect()
    }

    pub fn records(&self) -> &[Bookmark] {
        &self.records
    }

    /// Count line shown above the list, e.g. `3 bookmarks found for "rust"`.
    pub fn summary(&self, term: &str) -> String {
        let count = self.query(term).len();
        let noun = if count == 1 { "bookmark" } else { "bookmarks" };
        if term.is_empty() {
            format!("{} {}", count, noun)
        } else {
            format!("{} {} found for \"{}\"", count, noun, term)
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.records.iter().position(|b| b.id == id)
    }

    fn notify(&mut self, change: StoreChange) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&change);
        }
    }
}

impl BookmarkStoreTrait for BookmarkStore {
    fn seed(&mut self, records: Vec<Bookmark>) {
        let mut seen = HashSet::with_capacity(records.len());
        self.records = records
            .into_iter()
            .filter(|b| seen.insert(b.id.clone()))
            .collect();
        let count = self.records.len();
        self.notify(StoreChange::Seeded { count });
    }

    fn insert(&mut self, record: Bookmark) -> bool {
        if self.contains(&record.id) {
            return false;
        }
        let id = record.id.clone();
        self.records.insert(0, record);
        self.notify(StoreChange::Inserted(id));
        true
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.records.remove(pos);
                self.notify(StoreChange::Removed(id.to_string()));
                true
            }
            None => false,
        }
    }

    fn update(&mut self, record: Bookmark) -> bool {
        let Some(pos) = self.position(&record.id) else {
            return false;
        };
        if self.records[pos] == record {
            return false;
        }
        let id = record.id.clone();
        self.records[pos] = record;
        self.notify(StoreChange::Updated(id));
        true
    }

    fn query(&self, term: &str) -> Vec<Bookmark> {
        if term.is_empty() {
            return self.records.clone();
        }
        let needle = term.to_lowercase();
        self.records
            .iter()
            .filter(|b| b.matches_lowercase(&needle))
            .cloned()
            .collect()
    }
}
