//! Command handlers
//!
//! Commands that talk to the backend share [`connect`], which resolves the
//! saved session and wires the hosted backend into a `Bookmarks` service.

pub mod auth;
pub mod bookmark;
pub mod config;
pub mod status;
pub mod watch;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use shelf_core::{AuthClient, Bookmarks, Config, HostedBackend, HostedConfig, Session};

pub type Service = Bookmarks<HostedBackend, HostedBackend>;

/// Backend URL and API key, or a hint on how to set them
pub fn backend_settings(config: &Config) -> Result<(&str, &str)> {
    match (config.backend_url.as_deref(), config.api_key.as_deref()) {
        (Some(url), Some(key)) => Ok((url, key)),
        _ => bail!(
            "Backend not configured. Set it with:\n  \
             shelf config set backend_url https://<project>.example.co\n  \
             shelf config set api_key <public key>"
        ),
    }
}

/// Load the saved session, refreshing it when the access token has expired
pub async fn load_session(config: &Config) -> Result<Session> {
    let path = config.session_path();
    let session = Session::load(&path)
        .context("Failed to read saved session")?
        .ok_or_else(|| anyhow::anyhow!("Not signed in. Run `shelf login` first."))?;

    if !session.is_expired() {
        return Ok(session);
    }

    let Some(refresh_token) = session.refresh_token.as_deref() else {
        bail!("Session expired. Run `shelf login` again.");
    };

    let (url, key) = backend_settings(config)?;
    debug!("Access token expired, refreshing");
    let refreshed = AuthClient::new(url, key)?
        .refresh(refresh_token)
        .await
        .context("Session expired and could not be refreshed. Run `shelf login` again.")?;
    refreshed.save(&path)?;
    info!(user = refreshed.owner().short(), "Session refreshed");
    Ok(refreshed)
}

/// Build the session service for the signed-in user and load the list
///
/// With `live` the change feed is opened first so no change is missed
/// between the fetch and the subscription.
pub async fn connect(config: &Config, live: bool) -> Result<(Session, Service)> {
    let (url, key) = backend_settings(config)?;
    let session = load_session(config).await?;

    let hosted = HostedConfig::new(url, key, session.access_token.clone())
        .with_table(config.table.clone());
    let backend = Arc::new(HostedBackend::new(hosted).context("Failed to set up backend client")?);
    let service = Bookmarks::new(backend.clone(), backend);

    service
        .start(session.owner().clone(), live && config.realtime_enabled)
        .await
        .context("Failed to load bookmarks")?;

    Ok((session, service))
}
