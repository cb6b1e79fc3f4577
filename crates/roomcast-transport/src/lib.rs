//! Transport abstraction layer for Roomcast.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the room and
//! relay layers are written against, plus a WebSocket implementation.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
mod request;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use request::ConnectRequest;
#[cfg(feature = "websocket")]
pub use websocket::{
    DEFAULT_HANDSHAKE_TIMEOUT, PendingWebSocket, WebSocketConnection, WebSocketTransport,
};

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

/// Opaque identifier for a connection.
///
/// This is the identity the registry uses for set membership and removal;
/// two handles with the same id are the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Why a connection is being closed.
///
/// Maps onto the WebSocket close codes defined in RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the session ended normally.
    Normal,
    /// 1001: the server is going away or dropped an unresponsive peer.
    GoingAway,
    /// 1008: the peer was refused (bad credentials, not a member, bad room).
    PolicyViolation,
}

impl CloseCode {
    /// The numeric close code sent on the wire.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::PolicyViolation => 1008,
        }
    }

    /// Short human-readable reason sent alongside the code.
    pub fn reason(self) -> &'static str {
        match self {
            Self::Normal => "bye",
            Self::GoingAway => "going away",
            Self::PolicyViolation => "policy violation",
        }
    }
}

/// Source of peers for the server's accept loop.
///
/// `accept` only takes the peer off the listener. The protocol handshake
/// happens in [`Pending::complete`], which the caller runs on the peer's
/// own task so a slow or silent peer can't hold up the accept loop.
pub trait Transport: Send + Sync + 'static {
    type Pending: Pending;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Waits for the next peer. An error concerns that one peer; the
    /// transport keeps listening.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// The address peers connect to.
    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

/// A peer that has connected but not finished its handshake.
pub trait Pending: Send + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs the handshake. Fails instead of waiting forever on a peer
    /// that never sends its upgrade request.
    fn complete(self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send;
}

/// A single live bidirectional session carrying text frames.
///
/// Every future returned here is `Send` so that generic code (the local
/// broadcaster, the relay listener) can drive connections from spawned
/// tasks without knowing the concrete transport.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Sends one text payload to the remote peer.
    fn send(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receives the next text payload from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send;

    /// Closes the connection with the given code.
    ///
    /// Idempotent: closing an already-closed connection is `Ok(())`.
    fn close(
        &self,
        code: CloseCode,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
