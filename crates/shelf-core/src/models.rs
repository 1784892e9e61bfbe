//! Data models for Shelf
//!
//! Defines the core data structures: Bookmark, its tagged identifier, and the
//! signed-in user. Server rows and locally created (provisional) rows share the
//! `Bookmark` type; only the identifier tells them apart.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Prefix used when rendering provisional ids as text
const PROVISIONAL_PREFIX: &str = "p";

/// Identifier of a locally created bookmark that the backend has not
/// confirmed yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProvisionalId(pub u64);

impl fmt::Display for ProvisionalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", PROVISIONAL_PREFIX, self.0)
    }
}

/// Bookmark identifier
///
/// Server ids are assigned by the backend on commit and are monotonic.
/// Provisional ids are handed out by the client and live in their own
/// variant, so the two can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookmarkId {
    Provisional(ProvisionalId),
    Server(u64),
}

impl BookmarkId {
    /// Whether this id belongs to a record awaiting confirmation
    pub fn is_provisional(&self) -> bool {
        matches!(self, BookmarkId::Provisional(_))
    }

    /// The server id, if this is one
    pub fn server(&self) -> Option<u64> {
        match self {
            BookmarkId::Server(id) => Some(*id),
            BookmarkId::Provisional(_) => None,
        }
    }

    /// Parse an id as typed by a user (`42` or `p3`)
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix(PROVISIONAL_PREFIX) {
            return rest
                .parse()
                .ok()
                .map(|n| BookmarkId::Provisional(ProvisionalId(n)));
        }
        s.parse().ok().map(BookmarkId::Server)
    }
}

impl fmt::Display for BookmarkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookmarkId::Provisional(p) => write!(f, "{}", p),
            BookmarkId::Server(id) => write!(f, "{}", id),
        }
    }
}

impl From<u64> for BookmarkId {
    fn from(id: u64) -> Self {
        BookmarkId::Server(id)
    }
}

impl From<ProvisionalId> for BookmarkId {
    fn from(id: ProvisionalId) -> Self {
        BookmarkId::Provisional(id)
    }
}

// Server ids serialize as plain numbers, provisional ids as "p<n>" strings.
impl Serialize for BookmarkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BookmarkId::Server(id) => serializer.serialize_u64(*id),
            BookmarkId::Provisional(p) => serializer.collect_str(p),
        }
    }
}

impl<'de> Deserialize<'de> for BookmarkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = BookmarkId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a server id number or a provisional id string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BookmarkId, E> {
                Ok(BookmarkId::Server(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<BookmarkId, E> {
                u64::try_from(v)
                    .map(BookmarkId::Server)
                    .map_err(|_| E::custom(format!("negative bookmark id: {}", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BookmarkId, E> {
                BookmarkId::parse(v).ok_or_else(|| E::custom(format!("invalid bookmark id: {}", v)))
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

/// Identifier of a backend user (an opaque uuid string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A saved bookmark
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    /// Server or provisional identifier
    pub id: BookmarkId,
    /// Owning user
    #[serde(rename = "user_id")]
    pub owner_id: UserId,
    /// Display title
    pub title: String,
    /// Absolute http/https URL
    pub url: String,
    /// When this bookmark was created
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Create a provisional bookmark stamped with the current time
    pub fn provisional(
        id: ProvisionalId,
        owner_id: UserId,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: BookmarkId::Provisional(id),
            owner_id,
            title: title.into(),
            url: url.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    /// Whether title and url are exactly those of `other`
    pub fn same_content(&self, other: &Bookmark) -> bool {
        self.title == other.title && self.url == other.url
    }
}

/// Signed-in user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl User {
    /// Name to show in the UI, falling back to the email address
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_parse() {
        let server = BookmarkId::Server(42);
        let provisional = BookmarkId::Provisional(ProvisionalId(3));

        assert_eq!(server.to_string(), "42");
        assert_eq!(provisional.to_string(), "p3");
        assert_eq!(BookmarkId::parse("42"), Some(server));
        assert_eq!(BookmarkId::parse(" p3 "), Some(provisional));
        assert_eq!(BookmarkId::parse("px"), None);
        assert_eq!(BookmarkId::parse("-1"), None);
    }

    #[test]
    fn test_provisional_never_equals_server() {
        assert_ne!(
            BookmarkId::Provisional(ProvisionalId(7)),
            BookmarkId::Server(7)
        );
        assert!(BookmarkId::Provisional(ProvisionalId(7)).is_provisional());
        assert_eq!(BookmarkId::Server(7).server(), Some(7));
        assert_eq!(BookmarkId::Provisional(ProvisionalId(7)).server(), None);
    }

    #[test]
    fn test_bookmark_wire_shape() {
        let json = r#"{
            "id": 42,
            "user_id": "6f1c2a9e-0000-4000-8000-000000000000",
            "title": "Docs",
            "url": "https://example.com",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }"#;

        let bookmark: Bookmark = serde_json::from_str(json).unwrap();
        assert_eq!(bookmark.id, BookmarkId::Server(42));
        assert_eq!(bookmark.owner_id.short(), "6f1c2a9e");
        assert!(!bookmark.is_provisional());

        let value = serde_json::to_value(&bookmark).unwrap();
        assert_eq!(value["id"], 42);
        assert_eq!(value["user_id"], "6f1c2a9e-0000-4000-8000-000000000000");
    }

    #[test]
    fn test_provisional_serializes_as_string() {
        let bookmark = Bookmark::provisional(
            ProvisionalId(5),
            UserId::new("u1"),
            "Docs",
            "https://example.com",
        );
        let value = serde_json::to_value(&bookmark).unwrap();
        assert_eq!(value["id"], "p5");
    }

    #[test]
    fn test_same_content() {
        let owner = UserId::new("u1");
        let a = Bookmark::provisional(ProvisionalId(1), owner.clone(), "Docs", "https://x.com");
        let mut b = a.clone();
        b.id = BookmarkId::Server(9);
        assert!(a.same_content(&b));

        b.title = "docs".to_string();
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_user_display_name() {
        let mut user = User {
            id: UserId::new("u1"),
            email: "ada@example.com".to_string(),
            full_name: None,
            avatar_url: None,
        };
        assert_eq!(user.display_name(), "ada@example.com");

        user.full_name = Some("Ada".to_string());
        assert_eq!(user.display_name(), "Ada");
    }
}
