//! Unified error type for Roomcast.

use roomcast_protocol::ProtocolError;
use roomcast_relay::RelayError;
use roomcast_session::SessionError;
use roomcast_transport::TransportError;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `roomcast` crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]`
/// attribute on each variant auto-generates `From` impls, so the `?`
/// operator converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RoomcastError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid room id).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The client was refused (auth, room not found, not a member).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The relay failed.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The message store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration couldn't be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RoomcastError {
    /// `true` for errors that end a connection with a policy-violation
    /// close before it joins a room.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::Session(_) | Self::Protocol(ProtocolError::InvalidRoom(_))
        )
    }
}
