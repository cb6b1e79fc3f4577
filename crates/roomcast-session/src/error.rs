//! Error types for the session layer.

use roomcast_protocol::RoomId;

/// Reasons a client is refused before it is registered into a room.
///
/// Every variant ends the connection with a policy-violation close; none
/// is retried.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Authentication failed: the token was missing, invalid, or
    /// rejected by the [`Authenticator`](crate::Authenticator).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested room does not exist.
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    /// The identity is not allowed into the room.
    #[error("user {user} is not a member of room {room}")]
    NotMember { user: String, room: RoomId },
}
