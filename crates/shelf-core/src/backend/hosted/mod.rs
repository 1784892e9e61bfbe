//! Hosted backend client
//!
//! Talks to a hosted backend-as-a-service that exposes:
//!
//! - a REST table API under `/rest/v1/<table>` (row-level security enforced
//!   with the user's access token)
//! - a realtime websocket under `/realtime/v1/websocket` that pushes row
//!   changes over Phoenix channels
//!
//! ## Usage
//!
//! ```ignore
//! let backend = HostedBackend::new(HostedConfig::new(url, api_key, token))?;
//! let rows = backend.fetch_all(&owner).await?;
//! let mut sub = backend.subscribe(&owner).await?;
//! ```

mod message;
mod realtime;
mod rest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{BookmarkRepository, ChangeFeed, Subscription};
use crate::error::{PersistenceError, SubscriptionError};
use crate::models::{Bookmark, UserId};
use crate::validate::NewBookmark;

pub use message::{decode_change, Frame, MessageError};
use rest::RestClient;

/// Default table holding bookmark rows
pub const DEFAULT_TABLE: &str = "bookmarks";

/// Realtime protocol version sent on connect
const REALTIME_VSN: &str = "1.0.0";

/// Connection settings for the hosted backend
#[derive(Debug, Clone)]
pub struct HostedConfig {
    /// Project URL, e.g. `https://abc.example.co`
    pub base_url: String,
    /// Public (anon) API key
    pub api_key: String,
    /// Signed-in user's access token
    pub access_token: String,
    /// Table holding bookmark rows
    pub table: String,
    /// Per-request timeout for REST calls
    pub request_timeout: Duration,
    /// Interval between realtime heartbeats
    pub heartbeat_interval: Duration,
    /// Initial realtime reconnect delay
    pub initial_reconnect_delay: Duration,
    /// Maximum realtime reconnect delay
    pub max_reconnect_delay: Duration,
}

impl HostedConfig {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            access_token: access_token.into(),
            table: DEFAULT_TABLE.to_string(),
            request_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(25),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// REST endpoint of the bookmark table
    pub fn table_url(&self) -> String {
        format!(
            "{}/rest/v1/{}",
            self.base_url.trim_end_matches('/'),
            self.table
        )
    }

    /// Realtime websocket endpoint (`ws`/`wss` matching the base scheme)
    pub fn websocket_url(&self) -> Result<String, SubscriptionError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SubscriptionError::Connect(format!("invalid backend URL: {}", e)))?;

        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(SubscriptionError::Connect(format!(
                    "unsupported backend scheme '{}'",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SubscriptionError::Connect("cannot derive websocket URL".to_string()))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", REALTIME_VSN);

        Ok(url.to_string())
    }
}

/// Repository and change feed backed by the hosted service
#[derive(Debug, Clone)]
pub struct HostedBackend {
    config: Arc<HostedConfig>,
    rest: RestClient,
}

impl HostedBackend {
    pub fn new(config: HostedConfig) -> Result<Self, PersistenceError> {
        let config = Arc::new(config);
        let rest = RestClient::new(config.clone())?;
        Ok(Self { config, rest })
    }

    pub fn config(&self) -> &HostedConfig {
        &self.config
    }
}

#[async_trait]
impl BookmarkRepository for HostedBackend {
    async fn fetch_all(&self, owner: &UserId) -> Result<Vec<Bookmark>, PersistenceError> {
        self.rest.fetch_all(owner).await
    }

    async fn create(
        &self,
        new: &NewBookmark,
        owner: &UserId,
    ) -> Result<Bookmark, PersistenceError> {
        self.rest.create(new, owner).await
    }

    async fn delete(&self, id: u64, owner: &UserId) -> Result<bool, PersistenceError> {
        self.rest.delete(id, owner).await
    }
}

#[async_trait]
impl ChangeFeed for HostedBackend {
    async fn subscribe(&self, owner: &UserId) -> Result<Subscription, SubscriptionError> {
        let url = self.config.websocket_url()?;
        Ok(realtime::spawn_feed_task(
            self.config.clone(),
            url,
            owner.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_url() {
        let config = HostedConfig::new("https://abc.example.co/", "key", "token");
        assert_eq!(config.table_url(), "https://abc.example.co/rest/v1/bookmarks");

        let config = config.with_table("saved_links");
        assert_eq!(config.table_url(), "https://abc.example.co/rest/v1/saved_links");
    }

    #[test]
    fn test_websocket_url() {
        let config = HostedConfig::new("https://abc.example.co", "anon-key", "token");
        assert_eq!(
            config.websocket_url().unwrap(),
            "wss://abc.example.co/realtime/v1/websocket?apikey=anon-key&vsn=1.0.0"
        );

        let local = HostedConfig::new("http://localhost:54321", "k", "t");
        assert_eq!(
            local.websocket_url().unwrap(),
            "ws://localhost:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn test_websocket_url_rejects_bad_base() {
        let config = HostedConfig::new("not a url", "k", "t");
        assert!(matches!(
            config.websocket_url(),
            Err(SubscriptionError::Connect(_))
        ));

        let config = HostedConfig::new("ftp://files.example.co", "k", "t");
        assert!(config.websocket_url().is_err());
    }
}
