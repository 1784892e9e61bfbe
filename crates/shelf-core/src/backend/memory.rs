//! In-process backend
//!
//! Keeps rows in memory, hands out monotonic server ids, enforces per-owner
//! access and fans change events out to every subscriber of the row's owner.
//! Failure switches and create/delete gates let tests reproduce slow or failing
//! backends deterministically.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use super::{BookmarkRepository, ChangeFeed, FeedMessage, FeedStatus, Subscription};
use crate::error::{PersistenceError, SubscriptionError};
use crate::models::{Bookmark, BookmarkId, UserId};
use crate::reconcile::ChangeEvent;
use crate::validate::NewBookmark;

/// Buffered messages per subscriber
const SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct Faults {
    fetch: bool,
    create: bool,
    delete: bool,
    subscribe: bool,
    duplicate_events: bool,
}

#[derive(Debug)]
struct Inner {
    rows: Vec<Bookmark>,
    next_id: u64,
    subscribers: Vec<(UserId, mpsc::Sender<FeedMessage>)>,
    faults: Faults,
    create_gate: Option<Arc<Notify>>,
    delete_gate: Option<Arc<Notify>>,
}

/// In-memory repository and change feed
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                rows: Vec::new(),
                next_id: 1,
                subscribers: Vec::new(),
                faults: Faults::default(),
                create_gate: None,
                delete_gate: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a row as if another session had created it
    pub fn insert_remote(&self, owner: &UserId, title: &str, url: &str) -> Bookmark {
        let mut inner = self.lock();
        let row = inner.insert(owner, title, url);
        inner.publish(owner, ChangeEvent::Created(row.clone()));
        row
    }

    /// Change a row's title as if another session had edited it
    pub fn update_remote(&self, owner: &UserId, id: u64, title: &str) -> Option<Bookmark> {
        let mut inner = self.lock();
        let row = inner
            .rows
            .iter_mut()
            .find(|r| r.id == BookmarkId::Server(id) && &r.owner_id == owner)?;
        row.title = title.to_string();
        let row = row.clone();
        inner.publish(owner, ChangeEvent::Updated(row.clone()));
        Some(row)
    }

    /// Delete a row as if another session had removed it
    pub fn delete_remote(&self, owner: &UserId, id: u64) -> bool {
        self.lock().remove(owner, id)
    }

    /// Rows currently stored for `owner`
    pub fn rows(&self, owner: &UserId) -> Vec<Bookmark> {
        self.lock()
            .rows
            .iter()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect()
    }

    /// Number of open subscriptions for `owner`
    pub fn subscriber_count(&self, owner: &UserId) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|(_, tx)| !tx.is_closed());
        inner
            .subscribers
            .iter()
            .filter(|(o, _)| o == owner)
            .count()
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.lock().faults.fetch = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.lock().faults.create = fail;
    }

    pub fn fail_delete(&self, fail: bool) {
        self.lock().faults.delete = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().faults.subscribe = fail;
    }

    /// Deliver every change event twice
    pub fn duplicate_events(&self, duplicate: bool) {
        self.lock().faults.duplicate_events = duplicate;
    }

    /// Hold create responses until the returned gate is notified
    ///
    /// The row is committed and its `Created` event published right away;
    /// only the response to the caller waits. One `notify_one` releases one
    /// pending create.
    pub fn gate_creates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().create_gate = Some(gate.clone());
        gate
    }

    /// Hold deletes until the returned gate is notified
    ///
    /// Unlike creates, the row stays in place until the gate opens.
    pub fn gate_deletes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().delete_gate = Some(gate.clone());
        gate
    }

    /// Disconnect every subscriber of `owner` with a closed status
    pub fn drop_subscribers(&self, owner: &UserId) {
        let mut inner = self.lock();
        inner.subscribers.retain(|(o, tx)| {
            if o == owner {
                let _ = tx.try_send(FeedMessage::Error(SubscriptionError::Closed));
                let _ = tx.try_send(FeedMessage::Status(FeedStatus::Closed));
                false
            } else {
                true
            }
        });
    }
}

impl Inner {
    fn insert(&mut self, owner: &UserId, title: &str, url: &str) -> Bookmark {
        let row = Bookmark {
            id: BookmarkId::Server(self.next_id),
            owner_id: owner.clone(),
            title: title.to_string(),
            url: url.to_string(),
            created_at: Utc::now(),
        };
        self.next_id += 1;
        self.rows.push(row.clone());
        row
    }

    fn remove(&mut self, owner: &UserId, id: u64) -> bool {
        let before = self.rows.len();
        self.rows
            .retain(|r| !(r.id == BookmarkId::Server(id) && &r.owner_id == owner));
        let removed = self.rows.len() != before;
        if removed {
            self.publish(owner, ChangeEvent::Deleted(BookmarkId::Server(id)));
        }
        removed
    }

    fn publish(&mut self, owner: &UserId, event: ChangeEvent) {
        let copies = if self.faults.duplicate_events { 2 } else { 1 };
        self.subscribers.retain(|(o, tx)| {
            if o != owner {
                return !tx.is_closed();
            }
            for _ in 0..copies {
                match tx.try_send(FeedMessage::Event(event.clone())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(owner = owner.short(), "Subscriber buffer full, dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => return false,
                }
            }
            true
        });
    }
}

#[async_trait]
impl BookmarkRepository for MemoryBackend {
    async fn fetch_all(&self, owner: &UserId) -> Result<Vec<Bookmark>, PersistenceError> {
        let inner = self.lock();
        if inner.faults.fetch {
            return Err(PersistenceError::Unavailable("fetch disabled".to_string()));
        }
        let mut rows: Vec<Bookmark> = inner
            .rows
            .iter()
            .filter(|r| &r.owner_id == owner)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn create(
        &self,
        new: &NewBookmark,
        owner: &UserId,
    ) -> Result<Bookmark, PersistenceError> {
        let (row, gate) = {
            let mut inner = self.lock();
            if inner.faults.create {
                return Err(PersistenceError::Unavailable("create disabled".to_string()));
            }
            let row = inner.insert(owner, new.title(), new.url());
            inner.publish(owner, ChangeEvent::Created(row.clone()));
            (row, inner.create_gate.clone())
        };
        debug!(id = %row.id, "Memory backend committed row");

        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(row)
    }

    async fn delete(&self, id: u64, owner: &UserId) -> Result<bool, PersistenceError> {
        let gate = self.lock().delete_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut inner = self.lock();
        if inner.faults.delete {
            return Err(PersistenceError::Unavailable("delete disabled".to_string()));
        }
        Ok(inner.remove(owner, id))
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(&self, owner: &UserId) -> Result<Subscription, SubscriptionError> {
        let mut inner = self.lock();
        if inner.faults.subscribe {
            return Err(SubscriptionError::Connect("subscribe disabled".to_string()));
        }
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _ = tx.try_send(FeedMessage::Status(FeedStatus::Live));
        inner.subscribers.push((owner.clone(), tx));
        debug!(owner = owner.short(), "Memory backend subscriber added");
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::new_bookmark;

    #[tokio::test]
    async fn test_rows_are_scoped_to_owner() {
        let backend = MemoryBackend::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");

        let new = new_bookmark("Docs", "https://example.com").unwrap();
        let row = backend.create(&new, &alice).await.unwrap();

        assert_eq!(backend.fetch_all(&alice).await.unwrap().len(), 1);
        assert!(backend.fetch_all(&bob).await.unwrap().is_empty());

        // Bob cannot delete Alice's row
        assert!(!backend.delete(row.id.server().unwrap(), &bob).await.unwrap());
        assert!(backend.delete(row.id.server().unwrap(), &alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let backend = MemoryBackend::new();
        let owner = UserId::new("alice");
        let a = backend.insert_remote(&owner, "a", "https://a.com");
        let b = backend.insert_remote(&owner, "b", "https://b.com");
        assert!(b.id.server().unwrap() > a.id.server().unwrap());
    }

    #[tokio::test]
    async fn test_subscriber_receives_owner_events_only() {
        let backend = MemoryBackend::new();
        let alice = UserId::new("alice");
        let bob = UserId::new("bob");
        let mut sub = backend.subscribe(&alice).await.unwrap();

        assert_eq!(
            sub.recv().await,
            Some(FeedMessage::Status(FeedStatus::Live))
        );

        backend.insert_remote(&bob, "b", "https://b.com");
        let row = backend.insert_remote(&alice, "a", "https://a.com");

        assert_eq!(
            sub.recv().await,
            Some(FeedMessage::Event(ChangeEvent::Created(row)))
        );
    }

    #[tokio::test]
    async fn test_duplicate_events() {
        let backend = MemoryBackend::new();
        let owner = UserId::new("alice");
        let mut sub = backend.subscribe(&owner).await.unwrap();
        sub.recv().await;

        backend.duplicate_events(true);
        let row = backend.insert_remote(&owner, "a", "https://a.com");
        backend.delete_remote(&owner, row.id.server().unwrap());

        let expected_created = FeedMessage::Event(ChangeEvent::Created(row.clone()));
        let expected_deleted = FeedMessage::Event(ChangeEvent::Deleted(row.id));
        assert_eq!(sub.recv().await, Some(expected_created.clone()));
        assert_eq!(sub.recv().await, Some(expected_created));
        assert_eq!(sub.recv().await, Some(expected_deleted.clone()));
        assert_eq!(sub.recv().await, Some(expected_deleted));
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let backend = MemoryBackend::new();
        let owner = UserId::new("alice");
        let sub = backend.subscribe(&owner).await.unwrap();
        assert_eq!(backend.subscriber_count(&owner), 1);

        drop(sub);
        assert_eq!(backend.subscriber_count(&owner), 0);
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let backend = MemoryBackend::new();
        let owner = UserId::new("alice");
        let new = new_bookmark("Docs", "https://example.com").unwrap();

        backend.fail_create(true);
        assert!(backend.create(&new, &owner).await.is_err());
        assert!(backend.rows(&owner).is_empty());

        backend.fail_fetch(true);
        assert!(backend.fetch_all(&owner).await.is_err());

        backend.fail_subscribe(true);
        assert!(backend.subscribe(&owner).await.is_err());
    }
}
