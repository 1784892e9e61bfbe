//! Watch command handler
//!
//! Keeps a session open and prints the list whenever it changes, whether
//! the change came from this machine or another session.

use anyhow::{bail, Result};
use tracing::debug;

use shelf_core::{Bookmark, Config, FeedStatus};

use super::connect;
use crate::output::{list_line, Output, OutputFormat};

/// Watch until interrupted (Ctrl-C)
pub async fn run(config: &Config, output: &Output) -> Result<()> {
    if !config.realtime_enabled {
        bail!("Realtime is disabled. Enable it with `shelf config set realtime_enabled true`.");
    }

    let (_, service) = connect(config, true).await?;
    let mut changes = service.changes();
    let mut shown = service.snapshot();
    let mut status = service.feed_status();

    output.print_bookmarks(&shown);
    output.message("Watching for changes (Ctrl-C to stop)...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let current_status = service.feed_status();
        if current_status != status {
            status = current_status;
            report_status(status, output);
            if status == FeedStatus::Closed {
                break;
            }
        }

        let current = service.snapshot();
        if current != shown {
            print_diff(&shown, &current, output);
            shown = current;
        }
    }

    debug!("Watch stopped");
    service.shutdown().await;
    Ok(())
}

fn report_status(status: FeedStatus, output: &Output) {
    match status {
        FeedStatus::Live => output.message("● live"),
        FeedStatus::Disconnected => output.warn("connection lost, retrying"),
        FeedStatus::Closed => output.warn("live updates stopped"),
        FeedStatus::Idle | FeedStatus::Connecting => {}
    }
}

/// Print what was added and removed between two snapshots
fn print_diff(before: &[Bookmark], after: &[Bookmark], output: &Output) {
    let (added, removed) = diff(before, after);
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({ "added": added, "removed": removed })
            );
        }
        OutputFormat::Quiet => {
            for bookmark in &added {
                println!("+{}", bookmark.id);
            }
            for bookmark in &removed {
                println!("-{}", bookmark.id);
            }
        }
        OutputFormat::Human => {
            for bookmark in &added {
                println!("+ {}", list_line(bookmark));
            }
            for bookmark in &removed {
                println!("- {}", list_line(bookmark));
            }
        }
    }
}

/// Records only in `after`, and records only in `before`
///
/// A record whose content changed shows up in both.
fn diff<'a>(before: &'a [Bookmark], after: &'a [Bookmark]) -> (Vec<&'a Bookmark>, Vec<&'a Bookmark>) {
    let added = after.iter().filter(|b| !before.contains(b)).collect();
    let removed = before.iter().filter(|b| !after.contains(b)).collect();
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::{BookmarkId, ProvisionalId, UserId};

    fn bookmark(id: u64, title: &str) -> Bookmark {
        let mut b = Bookmark::provisional(ProvisionalId(id), UserId::new("u-1"), title, "https://x.com");
        b.id = BookmarkId::Server(id);
        b
    }

    #[test]
    fn test_diff_added_and_removed() {
        let a = bookmark(1, "a");
        let b = bookmark(2, "b");
        let c = bookmark(3, "c");

        let old = [a.clone(), b.clone()];
        let new = [c.clone(), a.clone()];
        let (added, removed) = diff(&old, &new);
        assert_eq!(added, vec![&c]);
        assert_eq!(removed, vec![&b]);
    }

    #[test]
    fn test_diff_reports_changed_record_both_ways() {
        let before = bookmark(1, "old");
        let mut after = before.clone();
        after.title = "new".to_string();

        let before = [before];
        let after = [after];
        let (added, removed) = diff(&before, &after);
        assert_eq!(added[0].title, "new");
        assert_eq!(removed[0].title, "old");
    }
}
