//! In-memory record store
//!
//! Holds the bookmarks of the signed-in user in canonical order (newest
//! first). Provisional records sit at the front until their create call
//! resolves.
//!
//! ## Invariants
//!
//! - at most one record per server id
//! - a server id removed in this context is remembered, so a late commit
//!   or a duplicated `Created` event cannot bring it back
//!
//! Every operation is total: unknown ids are no-ops, nothing panics.

use std::collections::HashSet;

use crate::models::{Bookmark, BookmarkId, ProvisionalId};

/// Ordered collection of one user's bookmarks
#[derive(Debug, Default, Clone)]
pub struct RecordStore {
    records: Vec<Bookmark>,
    /// Server ids removed since the last clear
    removed: HashSet<u64>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot after a full fetch
    ///
    /// Records are sorted by creation time, newest first. Provisional
    /// records still waiting on their create call are kept in front unless
    /// the fetched rows already contain their server counterpart: a row with
    /// the same content that this store had not seen before the fetch.
    pub fn replace_all(&mut self, records: Vec<Bookmark>) {
        let mut fresh: Vec<Bookmark> = Vec::with_capacity(records.len());
        for record in records {
            if record.is_provisional() {
                continue;
            }
            if fresh.iter().any(|r| r.id == record.id) {
                continue;
            }
            fresh.push(record);
        }
        fresh.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        // Only rows that are new to this store can be the counterpart of a
        // provisional, matched one-to-one with the oldest provisional first
        let known: HashSet<BookmarkId> = self
            .records
            .iter()
            .filter(|r| !r.is_provisional())
            .map(|r| r.id)
            .collect();
        let mut claimed: HashSet<BookmarkId> = HashSet::new();
        let mut pending: Vec<Bookmark> = Vec::new();
        for record in self.records.drain(..).rev() {
            if !record.is_provisional() {
                continue;
            }
            let counterpart = fresh.iter().find(|f| {
                !known.contains(&f.id) && !claimed.contains(&f.id) && f.same_content(&record)
            });
            match counterpart {
                Some(found) => {
                    claimed.insert(found.id);
                }
                None => pending.push(record),
            }
        }
        pending.reverse();

        for record in &fresh {
            if let Some(id) = record.id.server() {
                self.removed.remove(&id);
            }
        }

        self.records = pending;
        self.records.extend(fresh);
    }

    /// Add a provisional record to the front
    pub fn insert_provisional(&mut self, record: Bookmark) {
        debug_assert!(record.is_provisional());
        self.records.insert(0, record);
    }

    /// Swap a provisional record for its server row
    ///
    /// If the provisional record is already gone (the change feed got there
    /// first), this only makes sure `server` is present once. A server id
    /// removed in this context stays removed.
    pub fn commit_provisional(&mut self, provisional: ProvisionalId, server: Bookmark) {
        let Some(server_id) = server.id.server() else {
            return;
        };
        let slot = self.position(&BookmarkId::Provisional(provisional));
        let existing = self.position(&server.id);

        match (slot, existing) {
            (Some(slot), None) => {
                self.records[slot] = server;
            }
            (Some(slot), Some(_)) => {
                // Feed already prepended the server row; drop the duplicate.
                self.records.remove(slot);
            }
            (None, Some(_)) => {}
            (None, None) => {
                if !self.removed.contains(&server_id) {
                    self.records.insert(0, server);
                }
            }
        }
    }

    /// Drop a provisional record after its create call failed
    pub fn rollback_provisional(&mut self, provisional: ProvisionalId) -> bool {
        let id = BookmarkId::Provisional(provisional);
        match self.position(&id) {
            Some(index) => {
                self.records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove a record by id
    ///
    /// Returns whether a record was actually removed.
    pub fn remove(&mut self, id: &BookmarkId) -> bool {
        if let Some(server_id) = id.server() {
            self.removed.insert(server_id);
        }
        match self.position(id) {
            Some(index) => {
                self.records.remove(index);
                true
            }
            None => false,
        }
    }

    /// Put back a record whose remote delete failed
    ///
    /// Inserts at `index` (clamped), unless a record with the same id has
    /// reappeared in the meantime.
    pub fn restore(&mut self, record: Bookmark, index: usize) {
        if self.position(&record.id).is_some() {
            return;
        }
        if let Some(server_id) = record.id.server() {
            self.removed.remove(&server_id);
        }
        let index = index.min(self.records.len());
        self.records.insert(index, record);
    }

    /// Replace the fields of a present server record
    ///
    /// Returns `false` when the id is not in the store.
    pub fn replace(&mut self, record: Bookmark) -> bool {
        match self.position(&record.id) {
            Some(index) => {
                self.records[index] = record;
                true
            }
            None => false,
        }
    }

    /// Prepend a record that originated elsewhere
    ///
    /// Ignored when the id is present or was removed in this context.
    pub fn prepend(&mut self, record: Bookmark) -> bool {
        if self.contains(&record.id) || self.was_removed(&record.id) {
            return false;
        }
        self.records.insert(0, record);
        true
    }

    /// First provisional record with the same title and url as `record`,
    /// oldest first (creates commit in submission order)
    pub fn matching_provisional(&self, record: &Bookmark) -> Option<ProvisionalId> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.same_content(record))
            .find_map(|r| match r.id {
                BookmarkId::Provisional(p) => Some(p),
                BookmarkId::Server(_) => None,
            })
    }

    /// Current ordered records
    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.records.clone()
    }

    /// Borrow the current records without cloning
    pub fn records(&self) -> &[Bookmark] {
        &self.records
    }

    pub fn get(&self, id: &BookmarkId) -> Option<&Bookmark> {
        self.records.iter().find(|r| &r.id == id)
    }

    pub fn position(&self, id: &BookmarkId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    pub fn contains(&self, id: &BookmarkId) -> bool {
        self.position(id).is_some()
    }

    /// Whether a server id was removed since the last clear
    pub fn was_removed(&self, id: &BookmarkId) -> bool {
        id.server().is_some_and(|s| self.removed.contains(&s))
    }

    /// Number of records awaiting server confirmation
    pub fn pending(&self) -> usize {
        self.records.iter().filter(|r| r.is_provisional()).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget everything (sign-out or user switch)
    pub fn clear(&mut self) {
        self.records.clear();
        self.removed.clear();
    }
}
