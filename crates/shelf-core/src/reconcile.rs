//! Change feed reconciliation
//!
//! Folds remote change events into the [`RecordStore`]. The feed delivers
//! at-least-once and in no particular order, so every rule here is
//! idempotent:
//!
//! - `Created`: ignored if the server id is known; otherwise it replaces a
//!   provisional record with the same title and url, or is prepended as a
//!   record from another session
//! - `Updated`: replaces a present record, never inserts
//! - `Deleted`: removes whatever instance of the id exists

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{Bookmark, BookmarkId, ProvisionalId};
use crate::store::RecordStore;

/// A remote change to one of the user's bookmarks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record", rename_all = "snake_case")]
pub enum ChangeEvent {
    Created(Bookmark),
    Updated(Bookmark),
    Deleted(BookmarkId),
}

impl ChangeEvent {
    /// Id of the record the event is about
    pub fn id(&self) -> BookmarkId {
        match self {
            ChangeEvent::Created(r) | ChangeEvent::Updated(r) => r.id,
            ChangeEvent::Deleted(id) => *id,
        }
    }
}

/// What applying an event did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// New record from another session
    Inserted,
    /// Authoritative counterpart of a pending provisional record
    Reconciled(ProvisionalId),
    /// Fields of an existing record replaced
    Replaced,
    /// Record removed
    Removed,
    /// Duplicate, stale, or about an absent record
    Ignored,
}

impl Applied {
    /// Whether the snapshot changed
    pub fn changed(&self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// Apply one change event to the store
pub fn apply(store: &mut RecordStore, event: ChangeEvent) -> Applied {
    let id = event.id();
    let applied = match event {
        ChangeEvent::Created(record) => created(store, record),
        ChangeEvent::Updated(record) => {
            if record.is_provisional() || !store.replace(record) {
                Applied::Ignored
            } else {
                Applied::Replaced
            }
        }
        ChangeEvent::Deleted(id) => {
            if store.remove(&id) {
                Applied::Removed
            } else {
                Applied::Ignored
            }
        }
    };
    debug!(%id, ?applied, "Applied change event");
    applied
}

fn created(store: &mut RecordStore, record: Bookmark) -> Applied {
    if record.is_provisional() || store.contains(&record.id) || store.was_removed(&record.id) {
        return Applied::Ignored;
    }

    if let Some(provisional) = store.matching_provisional(&record) {
        store.rollback_provisional(provisional);
        store.prepend(record);
        return Applied::Reconciled(provisional);
    }

    store.prepend(record);
    Applied::Inserted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use chrono::Utc;

    fn server(id: u64, title: &str, url: &str) -> Bookmark {
        Bookmark {
            id: BookmarkId::Server(id),
            owner_id: UserId::new("user-1"),
            title: title.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
        }
    }

    fn provisional(n: u64, title: &str, url: &str) -> Bookmark {
        Bookmark::provisional(ProvisionalId(n), UserId::new("user-1"), title, url)
    }

    #[test]
    fn test_created_from_other_session_is_prepended() {
        let mut store = RecordStore::new();
        store.replace_all(vec![server(1, "a", "https://a.com")]);

        let applied = apply(&mut store, ChangeEvent::Created(server(2, "b", "https://b.com")));

        assert_eq!(applied, Applied::Inserted);
        assert_eq!(store.records()[0].id, BookmarkId::Server(2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_created_reconciles_matching_provisional_once() {
        let mut store = RecordStore::new();
        store.insert_provisional(provisional(1, "Docs", "https://example.com"));
        let event = ChangeEvent::Created(server(42, "Docs", "https://example.com"));

        assert_eq!(
            apply(&mut store, event.clone()),
            Applied::Reconciled(ProvisionalId(1))
        );
        assert_eq!(apply(&mut store, event), Applied::Ignored);

        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].id, BookmarkId::Server(42));
        assert_eq!(store.pending(), 0);
    }

    #[test]
    fn test_created_does_not_match_on_title_alone() {
        let mut store = RecordStore::new();
        store.insert_provisional(provisional(1, "Docs", "https://example.com"));

        let applied = apply(
            &mut store,
            ChangeEvent::Created(server(42, "Docs", "https://example.org")),
        );

        assert_eq!(applied, Applied::Inserted);
        assert_eq!(store.len(), 2);
        assert_eq!(store.pending(), 1);
    }

    #[test]
    fn test_feed_wins_race_then_persist_response_is_noop() {
        let mut store = RecordStore::new();
        store.insert_provisional(provisional(1, "Docs", "https://example.com"));

        apply(
            &mut store,
            ChangeEvent::Created(server(42, "Docs", "https://example.com")),
        );
        let after_feed = store.snapshot();

        store.commit_provisional(ProvisionalId(1), server(42, "Docs", "https://example.com"));

        assert_eq!(store.snapshot(), after_feed);
        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].id, BookmarkId::Server(42));
    }

    #[test]
    fn test_updated_replaces_present_record() {
        let mut store = RecordStore::new();
        store.replace_all(vec![server(3, "Old", "https://a.com")]);

        let applied = apply(&mut store, ChangeEvent::Updated(server(3, "New", "https://a.com")));

        assert_eq!(applied, Applied::Replaced);
        assert_eq!(store.records()[0].title, "New");
    }

    #[test]
    fn test_updated_for_absent_id_is_ignored() {
        let mut store = RecordStore::new();
        store.replace_all(vec![server(1, "a", "https://a.com")]);
        let before = store.snapshot();

        let applied = apply(&mut store, ChangeEvent::Updated(server(9, "x", "https://x.com")));

        assert_eq!(applied, Applied::Ignored);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_deleted_absent_id_is_noop() {
        let mut store = RecordStore::new();
        store.replace_all(vec![server(1, "a", "https://a.com")]);
        let before = store.snapshot();

        assert_eq!(
            apply(&mut store, ChangeEvent::Deleted(BookmarkId::Server(5))),
            Applied::Ignored
        );
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_double_delete_after_local_remove() {
        let mut store = RecordStore::new();
        store.replace_all(vec![server(7, "a", "https://a.com"), server(8, "b", "https://b.com")]);
        store.remove(&BookmarkId::Server(7));
        let before = store.snapshot();

        for _ in 0..2 {
            assert_eq!(
                apply(&mut store, ChangeEvent::Deleted(BookmarkId::Server(7))),
                Applied::Ignored
            );
        }
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_created_after_deleted_converges_to_absent() {
        let mut store = RecordStore::new();
        let record = server(11, "a", "https://a.com");

        apply(&mut store, ChangeEvent::Deleted(record.id));
        apply(&mut store, ChangeEvent::Created(record.clone()));
        assert!(store.is_empty());

        let mut other = RecordStore::new();
        apply(&mut other, ChangeEvent::Created(record.clone()));
        apply(&mut other, ChangeEvent::Deleted(record.id));
        apply(&mut other, ChangeEvent::Created(record));
        assert!(other.is_empty());
    }

    #[test]
    fn test_deleted_removes_provisional_instance() {
        let mut store = RecordStore::new();
        store.insert_provisional(provisional(4, "x", "https://x.com"));

        let applied = apply(
            &mut store,
            ChangeEvent::Deleted(BookmarkId::Provisional(ProvisionalId(4))),
        );

        assert_eq!(applied, Applied::Removed);
        assert!(store.is_empty());
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = ChangeEvent::Deleted(BookmarkId::Server(7));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "deleted");
        assert_eq!(json["record"], 7);
        assert!(Applied::Removed.changed());
        assert!(!Applied::Ignored.changed());
    }
}
