//! Error types for the relay layer.
//!
//! None of these are fatal: the bridge logs them and falls back to local
//! delivery, so a `RelayError` never reaches a connected client.

/// Errors from a relay transport.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The relay can't carry messages right now (not configured, not
    /// connected).
    #[error("relay unavailable: {0}")]
    Unavailable(String),

    /// The relay was closed and won't deliver anything else.
    #[error("relay closed")]
    Closed,

    /// The listener fell behind and the transport dropped messages.
    #[error("relay receiver lagged, {0} messages dropped")]
    Lagged(u64),

    /// An inbound channel name that doesn't map back to a room.
    #[error("invalid relay channel: {0}")]
    InvalidChannel(String),

    /// Error from the Redis client.
    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
