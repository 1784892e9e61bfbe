//! Status command handler

use std::time::Duration;

use anyhow::Result;
use shelf_core::{Config, FeedStatus, Session};

use super::connect;
use crate::output::{Output, OutputFormat};

/// How long to wait for the feed to go live before reporting
const LIVE_WAIT: Duration = Duration::from_secs(5);

/// Show backend, session and feed status
pub async fn show(config: &Config, output: &Output) -> Result<()> {
    let session = Session::load(&config.session_path()).ok().flatten();

    // Only probe the backend when it can succeed
    let probe = if config.has_backend() && session.is_some() {
        Some(probe(config).await)
    } else {
        None
    };

    let (count, feed, error) = match &probe {
        Some(Ok((count, feed))) => (Some(*count), Some(*feed), None),
        Some(Err(e)) => (None, None, Some(format!("{:#}", e))),
        None => (None, None, None),
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "backend_url": config.backend_url,
                    "signed_in": session.is_some(),
                    "user": session.as_ref().map(|s| &s.user.id),
                    "session_expired": session.as_ref().map(|s| s.is_expired()),
                    "realtime_enabled": config.realtime_enabled,
                    "feed": feed.map(feed_label),
                    "bookmarks": count,
                    "error": error,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", feed.map(feed_label).unwrap_or("offline"));
        }
        OutputFormat::Human => {
            println!("Shelf Status");
            println!("============");
            println!();
            println!("Backend:");
            println!(
                "  URL:      {}",
                config.backend_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  Realtime: {}",
                if config.realtime_enabled {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!();
            println!("Session:");
            match &session {
                Some(session) => {
                    println!("  User:    {}", session.user.display_name());
                    if session.is_expired() {
                        println!("  State:   expired");
                    }
                }
                None => println!("  Not signed in"),
            }
            if let Some(count) = count {
                println!();
                println!("Bookmarks: {}", count);
            }
            if let Some(feed) = feed {
                println!("Live feed: {}", feed_label(feed));
            }
            if let Some(error) = error {
                println!();
                println!("Error: {}", error);
            }
        }
    }

    Ok(())
}

/// Connect, wait briefly for the feed, and report what was seen
async fn probe(config: &Config) -> Result<(usize, FeedStatus)> {
    let (_, service) = connect(config, true).await?;
    if config.realtime_enabled {
        let mut changes = service.changes();
        let _ = tokio::time::timeout(LIVE_WAIT, async {
            while matches!(service.feed_status(), FeedStatus::Connecting) {
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
    }
    let result = (service.snapshot().len(), service.feed_status());
    service.shutdown().await;
    Ok(result)
}

fn feed_label(status: FeedStatus) -> &'static str {
    match status {
        FeedStatus::Idle => "off",
        FeedStatus::Connecting => "connecting",
        FeedStatus::Live => "live",
        FeedStatus::Disconnected => "reconnecting",
        FeedStatus::Closed => "closed",
    }
}
