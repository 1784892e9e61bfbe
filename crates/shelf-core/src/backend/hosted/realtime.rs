//! Realtime change feed connection
//!
//! Maintains a long-lived websocket joined to one owner's channel.
//! Handles reconnection automatically with exponential backoff; a rejected
//! join ends the subscription instead of retrying.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::message::{
    Frame, EVENT_CHANGES, EVENT_CLOSE, EVENT_ERROR, EVENT_REPLY, EVENT_SYSTEM,
};
use super::HostedConfig;
use crate::backend::{FeedMessage, FeedStatus, Subscription};
use crate::error::SubscriptionError;
use crate::models::UserId;

/// Buffered feed messages before the transport waits for the consumer
const FEED_BUFFER: usize = 64;

/// Why a connection ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Subscription cancelled or consumer gone
    Shutdown,
    /// Server closed the socket or channel; reconnect
    Dropped,
}

/// Spawn the transport task for one owner's channel
pub(super) fn spawn_feed_task(
    config: Arc<HostedConfig>,
    url: String,
    owner: UserId,
) -> Subscription {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = tokio::spawn(feed_task_loop(config, url, owner, tx, shutdown_rx));

    Subscription::with_task(rx, shutdown_tx, task)
}

/// Main loop with reconnection
async fn feed_task_loop(
    config: Arc<HostedConfig>,
    url: String,
    owner: UserId,
    tx: mpsc::Sender<FeedMessage>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        let _ = tx.send(FeedMessage::Status(FeedStatus::Connecting)).await;

        match connect_and_listen(&config, &url, &owner, &tx, &mut shutdown_rx).await {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Dropped) => {
                // Connection closed normally, reset backoff
                reconnect_delay = config.initial_reconnect_delay;
            }
            Err(SubscriptionError::Rejected(reason)) => {
                warn!(owner = owner.short(), %reason, "Realtime join rejected");
                let _ = tx
                    .send(FeedMessage::Error(SubscriptionError::Rejected(reason)))
                    .await;
                break;
            }
            Err(e) => {
                warn!(owner = owner.short(), error = %e, "Realtime connection failed");
                let _ = tx.send(FeedMessage::Error(e)).await;
            }
        }

        if tx
            .send(FeedMessage::Status(FeedStatus::Disconnected))
            .await
            .is_err()
        {
            break;
        }

        // Wait before reconnecting, but check for shutdown
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
            _ = &mut shutdown_rx => break,
        }
    }

    let _ = tx.send(FeedMessage::Status(FeedStatus::Closed)).await;
    debug!(owner = owner.short(), "Realtime task finished");
}

/// Connect, join, and forward changes until disconnection or shutdown
async fn connect_and_listen(
    config: &HostedConfig,
    url: &str,
    owner: &UserId,
    tx: &mpsc::Sender<FeedMessage>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Result<Exit, SubscriptionError> {
    let (ws_stream, _) = tokio::select! {
        _ = &mut *shutdown_rx => return Ok(Exit::Shutdown),
        connected = connect_async(url) => {
            connected.map_err(|e| SubscriptionError::Connect(e.to_string()))?
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let topic = Frame::channel_topic(&config.table, owner);
    let mut next_ref: u64 = 1;
    let join_ref = next_ref;
    next_ref += 1;

    let join = Frame::join(&topic, &config.table, owner, &config.access_token, join_ref);
    write
        .send(Message::Text(encode(&join)?))
        .await
        .map_err(|e| SubscriptionError::Connect(e.to_string()))?;
    debug!(%topic, "Sent channel join");

    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let leave = Frame::leave(&topic, next_ref);
                if let Ok(text) = encode(&leave) {
                    let _ = write.send(Message::Text(text)).await;
                }
                let _ = write.close().await;
                info!(%topic, "Left realtime channel");
                return Ok(Exit::Shutdown);
            }
            _ = heartbeat.tick() => {
                let frame = Frame::heartbeat(next_ref);
                next_ref += 1;
                write
                    .send(Message::Text(encode(&frame)?))
                    .await
                    .map_err(|e| SubscriptionError::Connect(e.to_string()))?;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match Frame::decode(&text) {
                        Ok(frame) => {
                            if let Some(exit) = handle_frame(&frame, &topic, join_ref, tx).await? {
                                return Ok(exit);
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to decode realtime frame"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(Exit::Dropped),
                    Some(Err(e)) => return Err(SubscriptionError::Connect(e.to_string())),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Act on one frame; `Some(exit)` ends the connection
async fn handle_frame(
    frame: &Frame,
    topic: &str,
    join_ref: u64,
    tx: &mpsc::Sender<FeedMessage>,
) -> Result<Option<Exit>, SubscriptionError> {
    if frame.topic != topic {
        // Heartbeat replies and other channels
        return Ok(None);
    }

    let message = match frame.event.as_str() {
        EVENT_REPLY if frame.replies_to(join_ref) => {
            if frame.status() == Some("ok") {
                info!(%topic, "Joined realtime channel");
                FeedMessage::Status(FeedStatus::Live)
            } else {
                return Err(SubscriptionError::Rejected(frame.reason()));
            }
        }
        EVENT_CHANGES => match frame.change_event() {
            Ok(event) => FeedMessage::Event(event),
            Err(e) => {
                warn!(error = %e, "Ignoring undecodable change");
                return Ok(None);
            }
        },
        EVENT_SYSTEM if frame.status() == Some("error") => {
            return Err(SubscriptionError::Rejected(frame.reason()));
        }
        EVENT_ERROR => {
            return Err(SubscriptionError::Connect("channel errored".to_string()));
        }
        EVENT_CLOSE => return Ok(Some(Exit::Dropped)),
        _ => return Ok(None),
    };

    if tx.send(message).await.is_err() {
        return Ok(Some(Exit::Shutdown));
    }
    Ok(None)
}

fn encode(frame: &Frame) -> Result<String, SubscriptionError> {
    frame
        .encode()
        .map_err(|e| SubscriptionError::Connect(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookmarkId;
    use crate::reconcile::ChangeEvent;

    const TOPIC: &str = "realtime:bookmarks:u-1";

    #[tokio::test]
    async fn test_cancel_during_handshake_stops_task() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept the socket but never answer the upgrade request
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(socket);
        });

        let config = Arc::new(HostedConfig::new(format!("http://{}", addr), "key", "token"));
        let url = config.websocket_url().unwrap();
        let mut subscription = spawn_feed_task(config, url, UserId::new("u-1"));
        assert_eq!(
            subscription.recv().await,
            Some(FeedMessage::Status(FeedStatus::Connecting))
        );

        tokio::time::timeout(std::time::Duration::from_secs(2), subscription.cancel())
            .await
            .unwrap();
        server.abort();
    }

    fn frame(json: &str) -> Frame {
        Frame::decode(json).unwrap()
    }

    #[tokio::test]
    async fn test_join_ok_reports_live() {
        let (tx, mut rx) = mpsc::channel(4);
        let reply = frame(
            r#"{"topic":"realtime:bookmarks:u-1","event":"phx_reply","ref":"1",
                "payload":{"status":"ok","response":{}}}"#,
        );

        assert_eq!(handle_frame(&reply, TOPIC, 1, &tx).await.unwrap(), None);
        assert_eq!(rx.recv().await, Some(FeedMessage::Status(FeedStatus::Live)));
    }

    #[tokio::test]
    async fn test_join_error_is_rejection() {
        let (tx, _rx) = mpsc::channel(4);
        let reply = frame(
            r#"{"topic":"realtime:bookmarks:u-1","event":"phx_reply","ref":"1",
                "payload":{"status":"error","response":{"reason":"invalid token"}}}"#,
        );

        assert_eq!(
            handle_frame(&reply, TOPIC, 1, &tx).await,
            Err(SubscriptionError::Rejected("invalid token".to_string()))
        );
    }

    #[tokio::test]
    async fn test_change_is_forwarded() {
        let (tx, mut rx) = mpsc::channel(4);
        let change = frame(
            r#"{"topic":"realtime:bookmarks:u-1","event":"postgres_changes","ref":null,
                "payload":{"data":{"type":"DELETE","old_record":{"id":7}}}}"#,
        );

        handle_frame(&change, TOPIC, 1, &tx).await.unwrap();
        assert_eq!(
            rx.recv().await,
            Some(FeedMessage::Event(ChangeEvent::Deleted(BookmarkId::Server(7))))
        );
    }

    #[tokio::test]
    async fn test_other_topics_and_heartbeat_replies_ignored() {
        let (tx, mut rx) = mpsc::channel(4);
        let heartbeat_reply = frame(
            r#"{"topic":"phoenix","event":"phx_reply","ref":"2","payload":{"status":"ok","response":{}}}"#,
        );

        assert_eq!(handle_frame(&heartbeat_reply, TOPIC, 1, &tx).await.unwrap(), None);
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_channel_close_drops_connection() {
        let (tx, _rx) = mpsc::channel(4);
        let close = frame(r#"{"topic":"realtime:bookmarks:u-1","event":"phx_close","ref":"1","payload":{}}"#);
        assert_eq!(
            handle_frame(&close, TOPIC, 1, &tx).await.unwrap(),
            Some(Exit::Dropped)
        );
    }

    #[tokio::test]
    async fn test_closed_consumer_shuts_down() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let change = frame(
            r#"{"topic":"realtime:bookmarks:u-1","event":"postgres_changes",
                "payload":{"data":{"type":"DELETE","old_record":{"id":1}}}}"#,
        );
        assert_eq!(
            handle_frame(&change, TOPIC, 1, &tx).await.unwrap(),
            Some(Exit::Shutdown)
        );
    }
}
