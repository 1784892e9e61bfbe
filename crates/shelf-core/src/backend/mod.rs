//! Backend collaborators
//!
//! The session service talks to the outside world through two traits:
//!
//! - [`BookmarkRepository`]: fetch, create and delete rows for one owner
//! - [`ChangeFeed`]: a push stream of change events for one owner
//!
//! Row-level access control lives behind these traits; callers always pass
//! the owner and implementations must never return another user's rows.
//!
//! ## Implementations
//!
//! - `memory`: in-process backend, used by tests and offline demos
//! - `hosted`: REST + realtime websocket client for the hosted backend

pub mod hosted;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{PersistenceError, SubscriptionError};
use crate::models::{Bookmark, UserId};
use crate::reconcile::ChangeEvent;
use crate::validate::NewBookmark;

pub use hosted::{HostedBackend, HostedConfig};
pub use memory::MemoryBackend;

/// Persistence collaborator
#[async_trait]
pub trait BookmarkRepository: Send + Sync {
    /// All bookmarks of `owner`, newest first
    async fn fetch_all(&self, owner: &UserId) -> Result<Vec<Bookmark>, PersistenceError>;

    /// Insert a validated bookmark and return the committed row
    async fn create(&self, new: &NewBookmark, owner: &UserId)
        -> Result<Bookmark, PersistenceError>;

    /// Delete a row; `false` when no row of `owner` had that id
    async fn delete(&self, id: u64, owner: &UserId) -> Result<bool, PersistenceError>;
}

/// Change feed collaborator
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open the feed for `owner`
    async fn subscribe(&self, owner: &UserId) -> Result<Subscription, SubscriptionError>;
}

/// Connection status of a feed subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// No subscription
    Idle,
    /// Attempting to connect or join
    Connecting,
    /// Joined and receiving events
    Live,
    /// Connection lost; the transport may retry
    Disconnected,
    /// Subscription ended for good
    Closed,
}

impl FeedStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, FeedStatus::Live)
    }
}

/// Messages delivered by a subscription
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Event(ChangeEvent),
    Status(FeedStatus),
    Error(SubscriptionError),
}

/// Handle to a live feed subscription
///
/// Dropping the handle (or calling [`Subscription::cancel`]) tells the
/// transport to leave the channel.
pub struct Subscription {
    messages: mpsc::Receiver<FeedMessage>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Wrap a message receiver with no background task
    pub fn new(messages: mpsc::Receiver<FeedMessage>) -> Self {
        Self {
            messages,
            shutdown_tx: None,
            task: None,
        }
    }

    /// Wrap a message receiver fed by a background transport task
    pub fn with_task(
        messages: mpsc::Receiver<FeedMessage>,
        shutdown_tx: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            messages,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Next message; `None` once the feed has ended
    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.messages.recv().await
    }

    /// Tear the subscription down and wait for the transport to finish
    ///
    /// Undelivered messages are discarded so the transport never blocks on
    /// a full channel while shutting down.
    pub async fn cancel(mut self) {
        self.messages.close();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("has_task", &self.task.is_some())
            .finish()
    }
}
