//! Bookshelf index: the in-memory source of truth for book records
//!
//! Records are kept in insertion order (an upsert of an existing hash keeps
//! its position). The series-grouped view is rebuilt under the write lock on
//! every mutation, so readers never observe a stale grouping. Observers can
//! subscribe to a revision counter that is bumped on each change.

use crate::types::{BookHash, BookRecord, Metadata};
use parking_lot::RwLock;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::watch;

/// Books sharing a series label; derived, never persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesGroup {
    pub name: String,
    pub books: Vec<BookRecord>,
}

/// An entry of the grouped shelf view
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ShelfItem {
    Book(BookRecord),
    Series(SeriesGroup),
}

impl ShelfItem {
    /// Number of books this entry stands for
    pub fn book_count(&self) -> usize {
        match self {
            ShelfItem::Book(_) => 1,
            ShelfItem::Series(group) => group.books.len(),
        }
    }

    /// Hashes of all books in this entry
    pub fn hashes(&self) -> Vec<BookHash> {
        match self {
            ShelfItem::Book(record) => vec![record.hash.clone()],
            ShelfItem::Series(group) => group.books.iter().map(|b| b.hash.clone()).collect(),
        }
    }
}

/// Search constraints used for counting and listing
#[derive(Debug, Clone, Default)]
pub struct ShelfFilter {
    /// Case-insensitive match on title, author or series name
    pub query: Option<String>,

    /// Restrict to one series (the grouped drill-down view)
    pub series: Option<String>,
}

impl ShelfFilter {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            series: None,
        }
    }

    pub fn series(name: impl Into<String>) -> Self {
        Self {
            query: None,
            series: Some(name.into()),
        }
    }

    pub fn matches(&self, record: &BookRecord) -> bool {
        if let Some(series) = &self.series {
            if record.series.as_ref().map(|s| &s.name) != Some(series) {
                return false;
            }
        }

        match self.query.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(query) => {
                let query = query.to_lowercase();
                let hit = |field: Option<&str>| {
                    field
                        .map(|f| f.to_lowercase().contains(&query))
                        .unwrap_or(false)
                };
                hit(record.title.as_deref())
                    || hit(record.author.as_deref())
                    || hit(record.series.as_ref().map(|s| s.name.as_str()))
            }
        }
    }
}

#[derive(Default)]
struct ShelfState {
    order: Vec<BookHash>,
    records: HashMap<BookHash, BookRecord>,
    grouped: Vec<ShelfItem>,
}

impl ShelfState {
    fn regroup(&mut self) {
        let mut items: Vec<ShelfItem> = Vec::new();
        let mut series_slots: HashMap<String, usize> = HashMap::new();

        for hash in &self.order {
            let Some(record) = self.records.get(hash) else {
                continue;
            };
            match &record.series {
                Some(series) => match series_slots.get(&series.name) {
                    Some(&slot) => {
                        if let ShelfItem::Series(group) = &mut items[slot] {
                            group.books.push(record.clone());
                        }
                    }
                    None => {
                        series_slots.insert(series.name.clone(), items.len());
                        items.push(ShelfItem::Series(SeriesGroup {
                            name: series.name.clone(),
                            books: vec![record.clone()],
                        }));
                    }
                },
                None => items.push(ShelfItem::Book(record.clone())),
            }
        }

        for item in &mut items {
            if let ShelfItem::Series(group) = item {
                group.books.sort_by(series_position_order);
            }
        }

        self.grouped = items;
    }
}

/// Books with a position come first in ascending order; the sort is stable so
/// ties keep insertion order
fn series_position_order(a: &BookRecord, b: &BookRecord) -> Ordering {
    let position = |r: &BookRecord| r.series.as_ref().and_then(|s| s.position);
    match (position(a), position(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// The queryable collection of a user's book records
pub struct Bookshelf {
    state: RwLock<ShelfState>,
    revision: watch::Sender<u64>,
}

impl Default for Bookshelf {
    fn default() -> Self {
        Self::new()
    }
}

impl Bookshelf {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(ShelfState::default()),
            revision,
        }
    }

    /// Build a shelf from previously persisted records
    pub fn from_records(records: impl IntoIterator<Item = BookRecord>) -> Self {
        let shelf = Self::new();
        shelf.replace_all(records);
        shelf
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut ShelfState) -> R) -> R {
        let result = {
            let mut state = self.state.write();
            let result = f(&mut state);
            state.regroup();
            result
        };
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    /// Insert or replace a record by hash. Returns true for a new book.
    pub fn upsert(&self, record: BookRecord) -> bool {
        self.mutate(|state| {
            let is_new = !state.records.contains_key(&record.hash);
            if is_new {
                state.order.push(record.hash.clone());
            }
            state.records.insert(record.hash.clone(), record);
            is_new
        })
    }

    /// Remove a record; no-op if absent
    pub fn remove(&self, hash: &BookHash) -> Option<BookRecord> {
        if !self.contains(hash) {
            return None;
        }
        self.mutate(|state| {
            let removed = state.records.remove(hash);
            if removed.is_some() {
                state.order.retain(|h| h != hash);
            }
            removed
        })
    }

    /// Mutate one record in place, returning the updated copy
    pub fn update(&self, hash: &BookHash, f: impl FnOnce(&mut BookRecord)) -> Option<BookRecord> {
        if !self.contains(hash) {
            return None;
        }
        self.mutate(|state| {
            state.records.get_mut(hash).map(|record| {
                f(record);
                record.clone()
            })
        })
    }

    /// Copy resolved display metadata onto a record
    pub fn apply_metadata(&self, hash: &BookHash, metadata: &Metadata) -> bool {
        self.update(hash, |record| record.apply_metadata(metadata))
            .is_some()
    }

    /// Replace the whole collection, preserving the given order
    pub fn replace_all(&self, records: impl IntoIterator<Item = BookRecord>) {
        self.mutate(|state| {
            state.order.clear();
            state.records.clear();
            for record in records {
                if !state.records.contains_key(&record.hash) {
                    state.order.push(record.hash.clone());
                }
                state.records.insert(record.hash.clone(), record);
            }
        });
    }

    pub fn get(&self, hash: &BookHash) -> Option<BookRecord> {
        self.state.read().records.get(hash).cloned()
    }

    pub fn contains(&self, hash: &BookHash) -> bool {
        self.state.read().records.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records in insertion order
    pub fn list_flat(&self) -> Vec<BookRecord> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|h| state.records.get(h).cloned())
            .collect()
    }

    /// Records for persistence, in shelf order
    pub fn snapshot(&self) -> Vec<BookRecord> {
        self.list_flat()
    }

    /// Standalone books and series groups, in insertion order of first member
    pub fn list_grouped(&self) -> Vec<ShelfItem> {
        self.state.read().grouped.clone()
    }

    /// Grouped view restricted to records matching `filter`
    pub fn search(&self, filter: &ShelfFilter) -> Vec<ShelfItem> {
        let state = self.state.read();
        state
            .grouped
            .iter()
            .filter_map(|item| match item {
                ShelfItem::Book(record) => filter.matches(record).then(|| item.clone()),
                ShelfItem::Series(group) => {
                    let books: Vec<BookRecord> = group
                        .books
                        .iter()
                        .filter(|r| filter.matches(r))
                        .cloned()
                        .collect();
                    (!books.is_empty()).then(|| {
                        ShelfItem::Series(SeriesGroup {
                            name: group.name.clone(),
                            books,
                        })
                    })
                }
            })
            .collect()
    }

    /// Number of books matching `filter`; a series contributes each member
    pub fn count(&self, filter: &ShelfFilter) -> usize {
        self.state
            .read()
            .records
            .values()
            .filter(|r| filter.matches(r))
            .count()
    }

    /// Revision counter, bumped on every mutation
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}
