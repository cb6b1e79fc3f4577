//! Core protocol types for Roomcast's wire format.
//!
//! Every type here is serialized into a JSON text frame, either sent to a
//! browser or carried through the relay between server instances.

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Display name used for join/leave announcements.
pub const SYSTEM_USER: &str = "system";

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The name of a chat room.
///
/// A validated newtype around `String`: non-empty, at most
/// [`RoomId::MAX_LEN`] bytes, no `/`, no whitespace or control characters.
/// The same value names the room in the URL path, in the registry, and in
/// the relay channel.
///
/// `Borrow<str>` lets maps keyed by `RoomId` be queried with a plain `&str`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Longest accepted room name, in bytes.
    pub const MAX_LEN: usize = 128;

    /// Validates and wraps a room name.
    pub fn parse(raw: impl Into<String>) -> Result<Self, ProtocolError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ProtocolError::InvalidRoom("empty room name".into()));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidRoom(format!(
                "room name longer than {} bytes",
                Self::MAX_LEN
            )));
        }
        if raw.chars().any(|c| c == '/' || c.is_whitespace() || c.is_control()) {
            return Err(ProtocolError::InvalidRoom(raw));
        }
        Ok(Self(raw))
    }

    /// The room name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for RoomId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RoomId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One past chat message, as delivered in the `history` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Display name of the author.
    pub user: String,
    /// Message body.
    pub msg: String,
    /// Optional attachment reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// When the message was stored (RFC 3339, UTC).
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ServerEvent: what clients receive
// ---------------------------------------------------------------------------

/// An event sent from the server to connected clients.
///
/// `#[serde(tag = "type", rename_all = "lowercase")]` produces the flat
/// shape the browser client switches on:
///
/// ```json
/// { "type": "chat", "user": "alice", "msg": "hi" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerEvent {
    /// Past messages, sent once right after joining.
    History { messages: Vec<HistoryEntry> },

    /// A chat message (from a user, the bot, or `system`).
    Chat {
        user: String,
        msg: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
    },

    /// A typing indicator change.
    Typing { user: String, status: bool },
}

impl ServerEvent {
    /// A chat event from `user`.
    pub fn chat(
        user: impl Into<String>,
        msg: impl Into<String>,
        file_id: Option<String>,
    ) -> Self {
        Self::Chat {
            user: user.into(),
            msg: msg.into(),
            file_id,
        }
    }

    /// A chat event from the `system` user.
    pub fn system(msg: impl Into<String>) -> Self {
        Self::chat(SYSTEM_USER, msg, None)
    }

    /// `"{name} joined"` announcement.
    pub fn joined(name: &str) -> Self {
        Self::system(format!("{name} joined"))
    }

    /// `"{name} left"` announcement.
    pub fn left(name: &str) -> Self {
        Self::system(format!("{name} left"))
    }

    /// A typing indicator for `user`.
    pub fn typing(user: impl Into<String>, status: bool) -> Self {
        Self::Typing {
            user: user.into(),
            status,
        }
    }
}

// ---------------------------------------------------------------------------
// ClientEvent: what clients send
// ---------------------------------------------------------------------------

/// An event sent by a client. The author is never taken from the payload;
/// the server attaches the authenticated display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    /// Post a message, optionally referencing an uploaded file.
    Chat {
        msg: String,
        #[serde(default)]
        file_id: Option<String>,
    },

    /// Start or stop the typing indicator.
    Typing { status: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // RoomId
    // =====================================================================

    #[test]
    fn test_room_id_accepts_plain_names() {
        let room = RoomId::parse("general").unwrap();
        assert_eq!(room.as_str(), "general");
        assert_eq!(room.to_string(), "general");
    }

    #[test]
    fn test_room_id_rejects_bad_names() {
        assert!(RoomId::parse("").is_err());
        assert!(RoomId::parse("a/b").is_err());
        assert!(RoomId::parse("game night").is_err());
        assert!(RoomId::parse("x".repeat(RoomId::MAX_LEN + 1)).is_err());
    }

    #[test]
    fn test_room_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&RoomId::parse("r1").unwrap()).unwrap();
        assert_eq!(json, "\"r1\"");
        let bad: Result<RoomId, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_room_id_borrows_as_str_for_map_lookup() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(RoomId::parse("r1").unwrap(), 1);
        assert_eq!(map.get("r1"), Some(&1));
    }

    // =====================================================================
    // ServerEvent: JSON shape
    // =====================================================================

    #[test]
    fn test_chat_event_json_format() {
        let json = serde_json::to_value(ServerEvent::chat("a", "hi", None)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "chat", "user": "a", "msg": "hi"}));
    }

    #[test]
    fn test_chat_event_with_file_id() {
        let event = ServerEvent::chat("a", "see file", Some("f-1".into()));
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["file_id"], "f-1");
    }

    #[test]
    fn test_typing_event_json_format() {
        let json = serde_json::to_value(ServerEvent::typing("bob", true)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "typing", "user": "bob", "status": true})
        );
    }

    #[test]
    fn test_history_event_json_format() {
        let timestamp = "2024-05-01T12:00:00Z".parse().unwrap();
        let event = ServerEvent::History {
            messages: vec![HistoryEntry {
                user: "a".into(),
                msg: "first".into(),
                file_id: None,
                timestamp,
            }],
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "history");
        assert_eq!(json["messages"][0]["msg"], "first");
        assert_eq!(json["messages"][0]["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_join_and_leave_announcements() {
        assert_eq!(ServerEvent::joined("ann"), ServerEvent::chat("system", "ann joined", None));
        assert_eq!(ServerEvent::left("ann"), ServerEvent::chat("system", "ann left", None));
    }

    // =====================================================================
    // ClientEvent: parsing inbound frames
    // =====================================================================

    #[test]
    fn test_client_chat_without_file_id() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"chat","msg":"hi"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::Chat {
                msg: "hi".into(),
                file_id: None
            }
        );
    }

    #[test]
    fn test_client_chat_ignores_spoofed_user() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"type":"chat","user":"mallory","msg":"hi"}"#).unwrap();
        assert!(matches!(event, ClientEvent::Chat { .. }));
    }

    #[test]
    fn test_client_unknown_type_is_rejected() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"type":"dance","speed":9000}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_client_chat_missing_msg_is_rejected() {
        let result: Result<ClientEvent, _> = serde_json::from_str(r#"{"type":"chat"}"#);
        assert!(result.is_err());
    }
}
