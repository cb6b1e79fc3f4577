//! Cross-instance relay for Roomcast rooms.
//!
//! A [`RelayBridge`] sits in front of the local [`Broadcaster`]. When the
//! configured [`Relay`] is active, broadcasts are published to a shared
//! per-room channel and reach local members only when they come back
//! through the bridge's listener, exactly like they reach every other
//! instance. When the relay is inactive, or a publish fails, the bridge
//! delivers locally instead.
//!
//! # Implementations
//!
//! - [`LocalOnly`]: single instance, never publishes
//! - [`MemoryBus`] / [`MemoryRelay`]: several bridges in one process
//! - [`RedisRelay`]: Redis pub/sub (feature `redis`, default)
//! - [`AnyRelay`]: one of the above, picked at startup
//!
//! [`Broadcaster`]: roomcast_room::Broadcaster

mod any;
mod backoff;
mod bridge;
mod error;
mod local;
mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::future::Future;

use roomcast_protocol::RoomId;

pub use any::AnyRelay;
pub use bridge::RelayBridge;
pub use error::RelayError;
pub use local::LocalOnly;
pub use memory::{MemoryBus, MemoryRelay};
#[cfg(feature = "redis")]
pub use redis::{DEFAULT_CHANNEL_PREFIX, RedisRelay};

/// Channel prefix used when the `redis` feature is disabled.
#[cfg(not(feature = "redis"))]
pub const DEFAULT_CHANNEL_PREFIX: &str = "roomcast:room:";

/// One payload carried by the relay, tagged with the room it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub room: RoomId,
    pub payload: String,
}

impl RelayMessage {
    pub fn new(room: RoomId, payload: impl Into<String>) -> Self {
        Self {
            room,
            payload: payload.into(),
        }
    }
}

/// A publish/subscribe transport keyed by room.
///
/// Futures are `Send` so the bridge can drive them from its spawned
/// listener task.
pub trait Relay: Send + Sync + 'static {
    /// Publishes `payload` on the room's shared channel.
    fn publish(
        &self,
        room: &RoomId,
        payload: &str,
    ) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Starts receiving messages published for `room`. Idempotent.
    fn subscribe(&self, room: &RoomId) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Stops receiving messages for `room`. Unknown rooms are a no-op.
    fn unsubscribe(&self, room: &RoomId) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Waits for the next message on any subscribed room.
    ///
    /// Must wait without spinning when nothing is subscribed. An error is
    /// transient unless the relay was closed; the caller retries.
    fn next_message(&self) -> impl Future<Output = Result<RelayMessage, RelayError>> + Send;

    /// Releases the transport. Idempotent.
    fn close(&self) -> impl Future<Output = ()> + Send;

    /// Returns `true` if published messages currently reach subscribers.
    fn is_active(&self) -> bool;
}
