//! Bookmark command handlers

use anyhow::{Context, Result};

use shelf_core::{Bookmark, BookmarkError, BookmarkId, Config};

use super::{connect, Service};
use crate::editor::confirm;
use crate::metadata::{fallback_title, fetch_title};
use crate::output::Output;

/// List all bookmarks
pub async fn list(config: &Config, output: &Output) -> Result<()> {
    let (_, service) = connect(config, false).await?;
    output.print_bookmarks(&service.snapshot());
    Ok(())
}

/// Save a new bookmark
pub async fn add(config: &Config, url: String, title: Option<String>, output: &Output) -> Result<()> {
    let title = match title {
        Some(title) => title,
        None => {
            // Validate before touching the network for the title
            let candidate = shelf_core::validate::normalize_url(&url)?;
            fetch_title(&candidate)
                .await
                .unwrap_or_else(|| fallback_title(&candidate))
        }
    };

    let (_, service) = connect(config, false).await?;
    let bookmark = service
        .add(&title, &url)
        .await
        .context("Failed to save bookmark")?;

    output.success(&format!("Saved bookmark {}", bookmark.id));
    output.print_bookmark(&bookmark);
    Ok(())
}

/// Delete a bookmark
pub async fn delete(config: &Config, id: String, output: &Output) -> Result<()> {
    let (_, service) = connect(config, false).await?;
    let bookmark = find(&service, &id)?;

    if output.should_prompt() {
        println!("Delete bookmark: {} - {}", bookmark.id, bookmark.title);
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    if service.delete(bookmark.id).await.context("Failed to delete bookmark")? {
        output.success(&format!("Deleted bookmark {}", bookmark.id));
    } else {
        output.message(&format!("Bookmark {} was already gone", bookmark.id));
    }
    Ok(())
}

/// Open a bookmark in the default browser
pub async fn open(config: &Config, id: String, output: &Output) -> Result<()> {
    let (_, service) = connect(config, false).await?;
    let bookmark = find(&service, &id)?;

    open::that(&bookmark.url).with_context(|| format!("Failed to open {}", bookmark.url))?;
    output.message(&format!("Opened {}", bookmark.url));
    Ok(())
}

/// Look up a bookmark by the ID shown in `list`
fn find(service: &Service, id: &str) -> Result<Bookmark> {
    let parsed = parse_id(id)?;
    service
        .get(&parsed)
        .ok_or_else(|| BookmarkError::NotFound(parsed).into())
}

fn parse_id(id: &str) -> Result<BookmarkId> {
    match BookmarkId::parse(id.trim()) {
        Some(BookmarkId::Server(id)) => Ok(BookmarkId::Server(id)),
        // Provisional ids only exist inside a running session
        Some(BookmarkId::Provisional(_)) | None => {
            anyhow::bail!("Invalid bookmark ID: '{}'. Use the number shown by `shelf list`.", id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), BookmarkId::Server(42));
        assert_eq!(parse_id(" 7 ").unwrap(), BookmarkId::Server(7));
        assert!(parse_id("p3").is_err());
        assert!(parse_id("abc").is_err());
        assert!(parse_id("").is_err());
    }
}
