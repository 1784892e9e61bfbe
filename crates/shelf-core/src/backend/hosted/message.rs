//! Realtime protocol frames
//!
//! The hosted realtime service speaks the Phoenix channel protocol: JSON
//! frames of `{topic, event, payload, ref}` over a websocket. Row changes
//! arrive as `postgres_changes` events on the joined channel.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{Bookmark, BookmarkId, UserId};
use crate::reconcile::ChangeEvent;

/// Topic used for protocol-level frames (heartbeats)
pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

/// Errors decoding realtime frames
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown change type '{0}'")]
    UnknownChange(String),

    #[error("Change payload has no {0}")]
    Missing(&'static str),
}

/// One protocol frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    /// Channel topic for one owner's rows
    pub fn channel_topic(table: &str, owner: &UserId) -> String {
        format!("realtime:{}:{}", table, owner)
    }

    /// Join a channel, asking for every change to `owner`'s rows in `table`
    pub fn join(topic: &str, table: &str, owner: &UserId, access_token: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": "*",
                        "schema": "public",
                        "table": table,
                        "filter": format!("user_id=eq.{}", owner),
                    }],
                },
                "access_token": access_token,
            }),
            reference: Some(reference.to_string()),
        }
    }

    pub fn leave(topic: &str, reference: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn heartbeat(reference: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference.to_string()),
        }
    }

    pub fn encode(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether this frame replies to the frame sent with `reference`
    pub fn replies_to(&self, reference: u64) -> bool {
        self.event == EVENT_REPLY && self.reference.as_deref() == Some(&*reference.to_string())
    }

    /// `payload.status` of replies and system frames
    pub fn status(&self) -> Option<&str> {
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Human-readable reason attached to an error reply or system frame
    pub fn reason(&self) -> String {
        self.payload
            .pointer("/response/reason")
            .or_else(|| self.payload.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("no reason given")
            .to_string()
    }

    /// Decode a `postgres_changes` payload into a change event
    pub fn change_event(&self) -> Result<ChangeEvent, MessageError> {
        decode_change(&self.payload)
    }
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type", alias = "eventType")]
    kind: String,
    #[serde(default, alias = "new")]
    record: Option<Value>,
    #[serde(default, alias = "old")]
    old_record: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OldKey {
    id: BookmarkId,
}

/// Decode a change payload
///
/// Accepts the current shape (`{data: {type, record, old_record}}`) and the
/// flat legacy shape where those fields sit directly in the payload.
pub fn decode_change(payload: &Value) -> Result<ChangeEvent, MessageError> {
    let data = payload.get("data").unwrap_or(payload);
    let data: ChangeData = serde_json::from_value(data.clone())?;

    match data.kind.as_str() {
        "INSERT" => {
            let record = data.record.ok_or(MessageError::Missing("record"))?;
            Ok(ChangeEvent::Created(serde_json::from_value::<Bookmark>(record)?))
        }
        "UPDATE" => {
            let record = data.record.ok_or(MessageError::Missing("record"))?;
            Ok(ChangeEvent::Updated(serde_json::from_value::<Bookmark>(record)?))
        }
        "DELETE" => {
            let old = data.old_record.ok_or(MessageError::Missing("old_record"))?;
            let key: OldKey = serde_json::from_value(old)?;
            Ok(ChangeEvent::Deleted(key.id))
        }
        other => Err(MessageError::UnknownChange(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSERT_FRAME: &str = r#"{
        "topic": "realtime:bookmarks:u-1",
        "event": "postgres_changes",
        "ref": null,
        "payload": {
            "ids": [1234],
            "data": {
                "schema": "public",
                "table": "bookmarks",
                "commit_timestamp": "2024-05-01T10:00:00Z",
                "type": "INSERT",
                "record": {
                    "id": 42,
                    "user_id": "u-1",
                    "title": "Docs",
                    "url": "https://example.com",
                    "created_at": "2024-05-01T10:00:00.000000+00:00"
                },
                "old_record": null,
                "errors": null
            }
        }
    }"#;

    #[test]
    fn test_decode_insert() {
        let frame = Frame::decode(INSERT_FRAME).unwrap();
        assert_eq!(frame.event, EVENT_CHANGES);
        assert!(frame.reference.is_none());

        match frame.change_event().unwrap() {
            ChangeEvent::Created(record) => {
                assert_eq!(record.id, BookmarkId::Server(42));
                assert_eq!(record.title, "Docs");
                assert_eq!(record.owner_id, UserId::new("u-1"));
            }
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_delete_with_key_only() {
        let payload = json!({
            "data": {
                "type": "DELETE",
                "record": null,
                "old_record": { "id": 7 }
            }
        });
        assert_eq!(
            decode_change(&payload).unwrap(),
            ChangeEvent::Deleted(BookmarkId::Server(7))
        );
    }

    #[test]
    fn test_decode_legacy_update_shape() {
        let payload = json!({
            "eventType": "UPDATE",
            "new": {
                "id": 3,
                "user_id": "u-1",
                "title": "Renamed",
                "url": "https://example.com",
                "created_at": "2024-05-01T10:00:00Z"
            },
            "old": { "id": 3 }
        });
        match decode_change(&payload).unwrap() {
            ChangeEvent::Updated(record) => assert_eq!(record.title, "Renamed"),
            other => panic!("expected Updated, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_change() {
        let payload = json!({ "data": { "type": "TRUNCATE" } });
        assert!(matches!(
            decode_change(&payload),
            Err(MessageError::UnknownChange(kind)) if kind == "TRUNCATE"
        ));
    }

    #[test]
    fn test_join_frame_filters_by_owner() {
        let owner = UserId::new("u-1");
        let topic = Frame::channel_topic("bookmarks", &owner);
        let frame = Frame::join(&topic, "bookmarks", &owner, "token", 1);
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(value["topic"], "realtime:bookmarks:u-1");
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "1");
        assert_eq!(
            value["payload"]["config"]["postgres_changes"][0]["filter"],
            "user_id=eq.u-1"
        );
        assert_eq!(value["payload"]["access_token"], "token");
    }

    #[test]
    fn test_reply_matching_and_reason() {
        let ok = Frame::decode(
            r#"{"topic":"realtime:bookmarks:u-1","event":"phx_reply","ref":"1",
                "payload":{"status":"ok","response":{}}}"#,
        )
        .unwrap();
        assert!(ok.replies_to(1));
        assert!(!ok.replies_to(2));
        assert_eq!(ok.status(), Some("ok"));

        let err = Frame::decode(
            r#"{"topic":"realtime:bookmarks:u-1","event":"phx_reply","ref":"1",
                "payload":{"status":"error","response":{"reason":"unauthorized"}}}"#,
        )
        .unwrap();
        assert_eq!(err.status(), Some("error"));
        assert_eq!(err.reason(), "unauthorized");
    }

    #[test]
    fn test_heartbeat_frame() {
        let frame = Frame::heartbeat(9);
        assert_eq!(frame.topic, PHOENIX_TOPIC);
        assert_eq!(frame.event, EVENT_HEARTBEAT);
        assert_eq!(frame.reference.as_deref(), Some("9"));
    }
}
