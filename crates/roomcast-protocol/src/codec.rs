//! Codec trait and implementations for serializing/deserializing events.
//!
//! A "codec" (coder/decoder) converts between Rust types and the text
//! payloads that travel in WebSocket frames and relay messages. The rest
//! of Roomcast only sees the [`Codec`] trait, so the encoding can change
//! without touching the handler or the relay.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// A codec that can encode Rust types to text and decode text back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the server.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a text payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError>;

    /// Deserializes a text payload back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the text is malformed,
    /// incomplete, or doesn't match the expected type.
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Browsers parse chat events with `JSON.parse`, so JSON text frames are
/// the wire format.
///
/// ## Example
///
/// ```rust
/// use roomcast_protocol::{ClientEvent, Codec, JsonCodec, ServerEvent};
///
/// let codec = JsonCodec;
///
/// let event = ServerEvent::chat("alice", "hi", None);
/// let text = codec.encode(&event).unwrap();
/// assert!(text.contains("\"type\":\"chat\""));
///
/// let inbound: ClientEvent = codec.decode(r#"{"type":"typing","status":true}"#).unwrap();
/// assert_eq!(inbound, ClientEvent::Typing { status: true });
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String, ProtocolError> {
        serde_json::to_string(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}
