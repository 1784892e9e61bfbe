//! REST table client

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::HostedConfig;
use crate::error::PersistenceError;
use crate::models::{Bookmark, UserId};
use crate::validate::NewBookmark;

/// Asks the table API to echo affected rows
const RETURN_REPRESENTATION: &str = "return=representation";

/// Error body returned by the table API
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

#[derive(Debug, Clone)]
pub(super) struct RestClient {
    http: reqwest::Client,
    config: Arc<HostedConfig>,
}

impl RestClient {
    pub(super) fn new(config: Arc<HostedConfig>) -> Result<Self, PersistenceError> {
        let mut headers = HeaderMap::new();
        headers.insert("apikey", header_value(&config.api_key)?);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", config.access_token))?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, config })
    }

    pub(super) async fn fetch_all(&self, owner: &UserId) -> Result<Vec<Bookmark>, PersistenceError> {
        debug!(owner = owner.short(), "Fetching bookmarks");
        let request = self.http.get(self.config.table_url()).query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{}", owner)),
            ("order", "created_at.desc".to_string()),
        ]);
        let rows: Vec<Bookmark> = send(request).await?.json().await?;
        debug!(count = rows.len(), "Fetched bookmarks");
        Ok(rows)
    }

    pub(super) async fn create(
        &self,
        new: &NewBookmark,
        owner: &UserId,
    ) -> Result<Bookmark, PersistenceError> {
        let request = self
            .http
            .post(self.config.table_url())
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&[json!({
                "title": new.title(),
                "url": new.url(),
                "user_id": owner,
            })]);

        let rows: Vec<Bookmark> = send(request).await?.json().await?;
        rows.into_iter().next().ok_or(PersistenceError::MissingRow)
    }

    pub(super) async fn delete(&self, id: u64, owner: &UserId) -> Result<bool, PersistenceError> {
        let request = self
            .http
            .delete(self.config.table_url())
            .header("Prefer", RETURN_REPRESENTATION)
            .query(&[
                ("id", format!("eq.{}", id)),
                ("user_id", format!("eq.{}", owner)),
            ]);

        let rows: Vec<serde_json::Value> = send(request).await?.json().await?;
        Ok(!rows.is_empty())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, PersistenceError> {
    HeaderValue::from_str(value)
        .map_err(|e| PersistenceError::Transport(format!("invalid header value: {}", e)))
}

/// Send a request and turn non-success statuses into `Rejected`
async fn send(request: RequestBuilder) -> Result<Response, PersistenceError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = rejection_message(&text);
    warn!(status = status.as_u16(), %message, "Backend rejected request");
    Err(PersistenceError::Rejected {
        status: status.as_u16(),
        message,
    })
}

/// Best human-readable message from an error body
fn rejection_message(body: &str) -> String {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.message.or(parsed.msg);
    match (message, parsed.hint) {
        (Some(message), Some(hint)) => format!("{} ({})", message, hint),
        (Some(message), None) => message,
        (None, _) if !body.trim().is_empty() => body.trim().to_string(),
        (None, _) => "no details".to_string(),
    }
}
