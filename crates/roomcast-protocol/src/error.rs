//! Error types for the protocol layer.
//!
//! Each crate in Roomcast defines its own error enum. A `ProtocolError`
//! always means the problem is in the shape of a message or identifier,
//! never in networking or room bookkeeping.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into text).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning text into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields,
    /// an unknown event `type`.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A room identifier that cannot name a room.
    #[error("invalid room id: {0}")]
    InvalidRoom(String),
}
