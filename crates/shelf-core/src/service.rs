//! Bookmark session service
//!
//! `Bookmarks` is the one place that mutates the signed-in user's record
//! store. Local intents (add, delete, refresh) and remote change events all
//! go through it, one at a time, under a single lock that is never held
//! across an `.await`.
//!
//! ## Optimistic mutations
//!
//! `add` shows a provisional record immediately, then swaps it for the
//! server row (or rolls it back) when the create call returns. `delete`
//! hides the record immediately and puts it back if the call fails.
//!
//! ## User context
//!
//! Every `set_user` starts a new context: the store is cleared, the old feed
//! subscription is torn down, and an epoch counter is bumped. Continuations
//! of calls started in an older context see a different epoch and leave the
//! store alone.
//!
//! ## Usage
//!
//! ```ignore
//! let service = Bookmarks::new(Arc::new(repo), Arc::new(feed));
//! service.start(owner, true).await?;
//! let saved = service.add("Docs", "example.com").await?;
//! for bookmark in service.snapshot() { ... }
//! ```

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BookmarkRepository, ChangeFeed, FeedMessage, FeedStatus, Subscription};
use crate::error::{BookmarkError, BookmarkResult};
use crate::models::{Bookmark, BookmarkId, ProvisionalId, UserId};
use crate::reconcile::{self, Applied, ChangeEvent};
use crate::store::RecordStore;
use crate::validate;

/// Mutable state of the current user context
#[derive(Debug)]
struct SessionState {
    owner: Option<UserId>,
    epoch: u64,
    store: RecordStore,
    loading: bool,
    last_error: Option<BookmarkError>,
    feed_status: FeedStatus,
    next_provisional: u64,
    /// Provisional records deleted before their create call returned
    cancelled: HashSet<ProvisionalId>,
}

/// State shared with the feed pump task
#[derive(Debug)]
struct Shared {
    state: Mutex<SessionState>,
    changed: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // State is plain data; a panicked holder cannot leave it half-written
        // in a way later operations rely on.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn notify(&self) {
        self.changed.send_modify(|version| *version += 1);
    }

    /// Apply a feed event if `epoch` is still current
    ///
    /// Returns `None` when the context has moved on.
    fn apply_event(&self, epoch: u64, event: ChangeEvent) -> Option<Applied> {
        let applied = {
            let mut state = self.lock();
            if state.epoch != epoch {
                return None;
            }
            reconcile::apply(&mut state.store, event)
        };
        if applied.changed() {
            self.notify();
        }
        Some(applied)
    }

    /// Record a feed status if `epoch` is still current
    fn set_feed_status(&self, epoch: u64, status: FeedStatus) -> bool {
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                return false;
            }
            if state.feed_status == status {
                return true;
            }
            state.feed_status = status;
        }
        self.notify();
        true
    }

    fn record_error(&self, epoch: u64, error: BookmarkError) {
        {
            let mut state = self.lock();
            if state.epoch != epoch {
                return;
            }
            state.last_error = Some(error);
        }
        self.notify();
    }
}

/// Session service over a repository and a change feed
pub struct Bookmarks<R, F> {
    repo: Arc<R>,
    feed: Arc<F>,
    shared: Arc<Shared>,
    /// Task forwarding feed messages into the store
    pump: AsyncMutex<Option<FeedPump>>,
}

/// Handle to a running feed pump
struct FeedPump {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl FeedPump {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Ask the pump to cancel its subscription and wait for it to exit
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Feed pump ended abnormally");
        }
    }
}

impl<R, F> Bookmarks<R, F>
where
    R: BookmarkRepository + 'static,
    F: ChangeFeed + 'static,
{
    pub fn new(repo: Arc<R>, feed: Arc<F>) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            repo,
            feed,
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState {
                    owner: None,
                    epoch: 0,
                    store: RecordStore::new(),
                    loading: false,
                    last_error: None,
                    feed_status: FeedStatus::Idle,
                    next_provisional: 1,
                    cancelled: HashSet::new(),
                }),
                changed,
            }),
            pump: AsyncMutex::new(None),
        }
    }

    // ==================== Context ====================

    /// Switch to another user (or sign out with `None`)
    ///
    /// Tears down the current subscription before clearing the store. A
    /// no-op when `owner` is already the active user.
    pub async fn set_user(&self, owner: Option<UserId>) {
        let mut pump = self.pump.lock().await;

        if self.shared.lock().owner == owner {
            return;
        }

        if let Some(running) = pump.take() {
            running.stop().await;
        }

        {
            let mut state = self.shared.lock();
            state.epoch += 1;
            state.owner = owner;
            state.store.clear();
            state.cancelled.clear();
            state.loading = false;
            state.last_error = None;
            state.feed_status = FeedStatus::Idle;
            info!(
                epoch = state.epoch,
                owner = state.owner.as_ref().map(|o| o.short()).unwrap_or("-"),
                "User context changed"
            );
        }
        self.shared.notify();
    }

    /// Switch to `owner`, optionally subscribe, then load the list
    ///
    /// A feed that cannot be established is reported through
    /// [`Bookmarks::feed_status`] and `last_error`; the list still loads.
    pub async fn start(&self, owner: UserId, live: bool) -> BookmarkResult<usize> {
        self.set_user(Some(owner)).await;
        if live {
            if let Err(e) = self.subscribe().await {
                warn!(error = %e, "Live updates unavailable");
            }
        }
        self.refresh().await
    }

    /// Sign out: drop the subscription and forget all records
    pub async fn shutdown(&self) {
        self.set_user(None).await;
    }

    /// Open the change feed for the current user
    ///
    /// Idempotent within a user context.
    pub async fn subscribe(&self) -> BookmarkResult<()> {
        let mut pump = self.pump.lock().await;
        if pump.as_ref().is_some_and(FeedPump::is_running) {
            return Ok(());
        }

        let (owner, epoch) = self.context()?;
        self.shared.set_feed_status(epoch, FeedStatus::Connecting);

        let subscription = match self.feed.subscribe(&owner).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(owner = owner.short(), error = %e, "Subscribe failed");
                self.shared.set_feed_status(epoch, FeedStatus::Closed);
                self.shared.record_error(epoch, e.clone().into());
                return Err(e.into());
            }
        };

        if self.shared.lock().epoch != epoch {
            return Err(BookmarkError::ContextChanged);
        }

        debug!(owner = owner.short(), epoch, "Feed subscription opened");
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(pump_feed(
            self.shared.clone(),
            self.repo.clone(),
            epoch,
            owner,
            subscription,
            stop_rx,
        ));
        *pump = Some(FeedPump { stop, task });
        Ok(())
    }

    // ==================== Operations ====================

    /// Reload the full list from the backend
    ///
    /// On failure the store keeps its last snapshot.
    pub async fn refresh(&self) -> BookmarkResult<usize> {
        let (owner, epoch) = self.context()?;
        refresh_snapshot(&self.shared, self.repo.as_ref(), epoch, &owner).await
    }

    /// Create a bookmark optimistically
    ///
    /// Input is validated before anything else happens. The provisional
    /// record is visible until the create call resolves.
    pub async fn add(&self, title: &str, url: &str) -> BookmarkResult<Bookmark> {
        let new = validate::new_bookmark(title, url)?;

        let (owner, epoch, provisional) = {
            let mut state = self.shared.lock();
            let owner = state.owner.clone().ok_or(BookmarkError::NotSignedIn)?;
            let provisional = ProvisionalId(state.next_provisional);
            state.next_provisional += 1;
            state.store.insert_provisional(Bookmark::provisional(
                provisional,
                owner.clone(),
                new.title(),
                new.url(),
            ));
            (owner, state.epoch, provisional)
        };
        self.shared.notify();
        debug!(%provisional, "Inserted provisional bookmark");

        let result = self.repo.create(&new, &owner).await;

        let cancelled = {
            let mut state = self.shared.lock();
            if state.epoch != epoch {
                debug!(%provisional, "Create finished after user change, ignoring");
                return result.map_err(Into::into);
            }
            match &result {
                Ok(server) => {
                    if state.cancelled.remove(&provisional) {
                        state.store.remove(&server.id);
                        true
                    } else {
                        state.store.commit_provisional(provisional, server.clone());
                        state.last_error = None;
                        false
                    }
                }
                Err(e) => {
                    state.cancelled.remove(&provisional);
                    state.store.rollback_provisional(provisional);
                    state.last_error = Some(e.clone().into());
                    false
                }
            }
        };
        self.shared.notify();

        let server = match result {
            Ok(server) => server,
            Err(e) => {
                warn!(%provisional, error = %e, "Create failed, rolled back");
                return Err(e.into());
            }
        };

        if cancelled {
            // Deleted while still provisional; remove the row it became.
            if let Some(id) = server.id.server() {
                if let Err(e) = self.repo.delete(id, &owner).await {
                    warn!(id, error = %e, "Failed to delete cancelled bookmark");
                    self.shared.record_error(epoch, e.into());
                }
            }
            info!(id = %server.id, "Bookmark deleted before its create completed");
        } else {
            info!(id = %server.id, "Bookmark added");
        }
        Ok(server)
    }

    /// Delete a bookmark optimistically
    ///
    /// Returns `false` when there was nothing to delete. A provisional
    /// record is dropped locally and its create is cancelled.
    pub async fn delete(&self, id: BookmarkId) -> BookmarkResult<bool> {
        let (owner, epoch, removed, server_id) = {
            let mut state = self.shared.lock();
            let owner = state.owner.clone().ok_or(BookmarkError::NotSignedIn)?;

            let server_id = match id {
                BookmarkId::Provisional(provisional) => {
                    let removed = state.store.rollback_provisional(provisional);
                    if removed {
                        state.cancelled.insert(provisional);
                    }
                    drop(state);
                    if removed {
                        self.shared.notify();
                    }
                    return Ok(removed);
                }
                BookmarkId::Server(server_id) => server_id,
            };

            let removed = state
                .store
                .position(&id)
                .and_then(|index| state.store.get(&id).cloned().map(|r| (r, index)));
            state.store.remove(&id);
            (owner, state.epoch, removed, server_id)
        };
        if removed.is_some() {
            self.shared.notify();
        }

        let result = self.repo.delete(server_id, &owner).await;

        {
            let mut state = self.shared.lock();
            if state.epoch != epoch {
                return result.map_err(Into::into);
            }
            match &result {
                Ok(_) => {
                    // A refresh fetched before the delete committed may have
                    // put the row back
                    state.store.remove(&id);
                    state.last_error = None;
                }
                Err(e) => {
                    if let Some((record, index)) = removed.clone() {
                        state.store.restore(record, index);
                    }
                    state.last_error = Some(e.clone().into());
                }
            }
        }
        self.shared.notify();

        match result {
            Ok(deleted) => {
                info!(id = server_id, deleted, "Bookmark delete finished");
                Ok(deleted || removed.is_some())
            }
            Err(e) => {
                warn!(id = server_id, error = %e, "Delete failed, restored");
                Err(e.into())
            }
        }
    }

    /// Fold one change event into the store
    ///
    /// Used by the feed pump; exposed for callers that receive events by
    /// other means.
    pub fn apply_event(&self, event: ChangeEvent) -> Applied {
        let epoch = self.shared.lock().epoch;
        self.shared.apply_event(epoch, event).unwrap_or(Applied::Ignored)
    }

    // ==================== Reads ====================

    /// Current ordered records
    pub fn snapshot(&self) -> Vec<Bookmark> {
        self.shared.lock().store.snapshot()
    }

    pub fn get(&self, id: &BookmarkId) -> Option<Bookmark> {
        self.shared.lock().store.get(id).cloned()
    }

    pub fn owner(&self) -> Option<UserId> {
        self.shared.lock().owner.clone()
    }

    pub fn feed_status(&self) -> FeedStatus {
        self.shared.lock().feed_status
    }

    pub fn is_live(&self) -> bool {
        self.feed_status().is_live()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().loading
    }

    /// Last error surfaced by any operation in this context
    pub fn last_error(&self) -> Option<BookmarkError> {
        self.shared.lock().last_error.clone()
    }

    /// Number of creates still awaiting the backend
    pub fn pending(&self) -> usize {
        self.shared.lock().store.pending()
    }

    /// Watch for state changes (the value is a change counter)
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changed.subscribe()
    }

    fn context(&self) -> BookmarkResult<(UserId, u64)> {
        let state = self.shared.lock();
        let owner = state.owner.clone().ok_or(BookmarkError::NotSignedIn)?;
        Ok((owner, state.epoch))
    }
}

impl<R, F> Drop for Bookmarks<R, F> {
    fn drop(&mut self) {
        if let Some(running) = self.pump.get_mut().take() {
            running.task.abort();
        }
    }
}

/// Fetch the list and replace the snapshot if `epoch` is still current
async fn refresh_snapshot<R: BookmarkRepository + ?Sized>(
    shared: &Shared,
    repo: &R,
    epoch: u64,
    owner: &UserId,
) -> BookmarkResult<usize> {
    {
        let mut state = shared.lock();
        if state.epoch != epoch {
            return Err(BookmarkError::ContextChanged);
        }
        state.loading = true;
    }
    shared.notify();

    let result = repo.fetch_all(owner).await;

    let outcome = {
        let mut state = shared.lock();
        if state.epoch != epoch {
            return Err(BookmarkError::ContextChanged);
        }
        state.loading = false;
        match result {
            Ok(rows) => {
                state.store.replace_all(rows);
                state.last_error = None;
                Ok(state.store.len())
            }
            Err(e) => {
                state.last_error = Some(e.clone().into());
                Err(BookmarkError::from(e))
            }
        }
    };
    shared.notify();

    match &outcome {
        Ok(count) => debug!(count, "Bookmarks loaded"),
        Err(e) => warn!(error = %e, "Failed to load bookmarks"),
    }
    outcome
}

/// Forward feed messages into the store until the feed ends, the context
/// changes, or `stop` fires
async fn pump_feed<R: BookmarkRepository + ?Sized>(
    shared: Arc<Shared>,
    repo: Arc<R>,
    epoch: u64,
    owner: UserId,
    mut subscription: Subscription,
    mut stop: oneshot::Receiver<()>,
) {
    let mut was_live = false;
    let mut needs_resync = false;
    let mut stopped = false;

    loop {
        let message = tokio::select! {
            _ = &mut stop => {
                stopped = true;
                break;
            }
            message = subscription.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        match message {
            FeedMessage::Event(event) => {
                if shared.apply_event(epoch, event).is_none() {
                    break;
                }
            }
            FeedMessage::Status(status) => {
                if !shared.set_feed_status(epoch, status) {
                    break;
                }
                match status {
                    FeedStatus::Live => {
                        if needs_resync {
                            // Events may have been missed while disconnected
                            info!(owner = owner.short(), "Feed reconnected, reloading");
                            tokio::select! {
                                _ = &mut stop => {
                                    stopped = true;
                                    break;
                                }
                                _ = refresh_snapshot(&shared, repo.as_ref(), epoch, &owner) => {}
                            }
                        }
                        was_live = true;
                        needs_resync = false;
                    }
                    FeedStatus::Disconnected | FeedStatus::Closed if was_live => {
                        needs_resync = true;
                    }
                    _ => {}
                }
            }
            FeedMessage::Error(e) => {
                warn!(owner = owner.short(), error = %e, "Feed error");
                shared.record_error(epoch, e.into());
            }
        }
    }

    subscription.cancel().await;
    if !stopped {
        shared.set_feed_status(epoch, FeedStatus::Closed);
    }
    debug!(owner = owner.short(), epoch, stopped, "Feed pump stopped");
}
