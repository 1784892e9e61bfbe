//! Shelf Core Library
//!
//! This crate provides the core of Shelf, a personal bookmark manager with
//! optimistic updates and realtime reconciliation.
//!
//! # Architecture
//!
//! - **RecordStore**: the ordered, in-memory list of the user's bookmarks
//! - **Reconciler**: folds remote change events into the store idempotently
//! - **Bookmarks**: the session service; the single entry point for updates
//!
//! Persistence and the change feed sit behind the `BookmarkRepository` and
//! `ChangeFeed` traits, with an in-memory and a hosted implementation.
//!
//! # Quick Start
//!
//! ```text
//! let backend = HostedBackend::new(HostedConfig::new(url, key, token))?;
//! let backend = Arc::new(backend);
//! let bookmarks = Bookmarks::new(backend.clone(), backend);
//!
//! bookmarks.start(session.owner(), true).await?;
//! bookmarks.add("Rust", "rust-lang.org").await?;
//! let list = bookmarks.snapshot();
//! ```
//!
//! # Modules
//!
//! - `service`: session service (main entry point)
//! - `store`: ordered record store
//! - `reconcile`: change events and how they apply
//! - `backend`: repository and change feed implementations
//! - `validate`: title and URL validation
//! - `auth`: sign-in session handling
//! - `config`: application configuration

pub mod auth;
pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod service;
pub mod store;
pub mod validate;

pub use auth::{AuthClient, Session};
pub use backend::{
    BookmarkRepository, ChangeFeed, FeedMessage, FeedStatus, HostedBackend, HostedConfig,
    MemoryBackend, Subscription,
};
pub use config::Config;
pub use error::{
    AuthError, BookmarkError, BookmarkResult, PersistenceError, SubscriptionError,
    ValidationError,
};
pub use models::{Bookmark, BookmarkId, ProvisionalId, User, UserId};
pub use reconcile::{Applied, ChangeEvent};
pub use service::Bookmarks;
pub use store::RecordStore;
pub use validate::{new_bookmark, NewBookmark};
