//! Error handling
//!
//! Typed errors for each collaborator boundary, plus the umbrella
//! `BookmarkError` returned by the session service. None of these are fatal:
//! every failure is recoverable by the user retrying (re-submitting the form
//! or reloading the list).

use thiserror::Error;

use crate::models::BookmarkId;

/// Bad title or URL, detected before any store mutation or remote call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Title is required")]
    EmptyTitle,

    #[error("Title must be at most {max} characters (got {len})")]
    TitleTooLong { len: usize, max: usize },

    #[error("URL is required")]
    EmptyUrl,

    #[error("URL must be at most {max} characters (got {len})")]
    UrlTooLong { len: usize, max: usize },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{scheme}'. Only http and https links can be saved.")]
    UnsupportedScheme { scheme: String },
}

/// Remote fetch/create/delete failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Request never got a response (DNS, TLS, timeout, connection reset)
    #[error("Backend request failed: {0}")]
    Transport(String),

    /// Backend answered with a non-success status
    #[error("Backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Unexpected backend response: {0}")]
    Decode(String),

    /// Insert succeeded but returned no row
    #[error("Bookmark creation failed - no data returned")]
    MissingRow,

    /// Backend is unreachable or refusing writes
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for PersistenceError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            PersistenceError::Decode(error.to_string())
        } else {
            PersistenceError::Transport(error.to_string())
        }
    }
}

/// Change feed could not be established or dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Failed to connect to change feed: {0}")]
    Connect(String),

    #[error("Change feed subscription rejected: {0}")]
    Rejected(String),

    #[error("Change feed closed")]
    Closed,
}

/// Sign-in and session failures
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Invalid access token: {0}")]
    InvalidToken(String),

    #[error("Session expired. Sign in again.")]
    Expired,

    #[error("Auth request failed: {0}")]
    Request(String),

    #[error("Backend not configured. Set backend_url and api_key first.")]
    NotConfigured,

    #[error("Session file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        AuthError::Request(error.to_string())
    }
}

/// Errors returned by the bookmark session service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookmarkError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Not authenticated")]
    NotSignedIn,

    #[error("Bookmark not found: {0}")]
    NotFound(BookmarkId),

    /// The signed-in user changed while the operation was in flight
    #[error("Signed-in user changed before the operation finished")]
    ContextChanged,
}

impl BookmarkError {
    /// Check if retrying the same operation can succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BookmarkError::Persistence(_) | BookmarkError::Subscription(_)
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            BookmarkError::Validation(_) => Some("Fix the title or URL and submit again."),
            BookmarkError::Persistence(_) => {
                Some("Check your connection and try again. Reload the list if it looks stale.")
            }
            BookmarkError::Subscription(_) => {
                Some("Live updates are paused. Reload the list to see changes from other sessions.")
            }
            BookmarkError::NotSignedIn => Some("Sign in with `shelf login`."),
            _ => None,
        }
    }
}

/// Result type for service operations
pub type BookmarkResult<T> = Result<T, BookmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_display() {
        let err = ValidationError::TitleTooLong { len: 501, max: 500 };
        assert_eq!(
            err.to_string(),
            "Title must be at most 500 characters (got 501)"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        let err: BookmarkError = PersistenceError::Transport("reset".into()).into();
        assert!(err.is_recoverable());
        assert!(err.recovery_suggestion().is_some());

        let err: BookmarkError = ValidationError::EmptyTitle.into();
        assert!(!err.is_recoverable());
        assert_eq!(err.to_string(), "Title is required");
    }

    #[test]
    fn test_rejected_display() {
        let err = PersistenceError::Rejected {
            status: 401,
            message: "JWT expired".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("401"));
        assert!(msg.contains("JWT expired"));
    }

    #[test]
    fn test_not_found_display() {
        let err = BookmarkError::NotFound(BookmarkId::Server(7));
        assert_eq!(err.to_string(), "Bookmark not found: 7");
        assert!(err.recovery_suggestion().is_none());
    }
}
