use roomcast_protocol::RoomId;

#[cfg(feature = "redis")]
use crate::RedisRelay;
use crate::{LocalOnly, MemoryRelay, Relay, RelayError, RelayMessage};

/// A relay chosen at startup.
///
/// Lets the server type stay the same whether or not a shared relay is
/// configured; call sites never know which variant is active.
pub enum AnyRelay {
    Local(LocalOnly),
    Memory(MemoryRelay),
    #[cfg(feature = "redis")]
    Redis(RedisRelay),
}

impl AnyRelay {
    /// Picks a relay for `url`.
    ///
    /// `None` means single-instance. A URL that can't be reached (or a
    /// build without the `redis` feature) degrades to [`LocalOnly`] with a
    /// warning; startup never fails because of the relay.
    pub async fn connect(url: Option<&str>, prefix: &str) -> Self {
        let Some(url) = url else {
            tracing::info!("no relay configured, running single-instance");
            return Self::Local(LocalOnly);
        };

        connect_redis(url, prefix).await
    }

    /// Short name of the active variant, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Memory(_) => "memory",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
        }
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(url: &str, prefix: &str) -> AnyRelay {
    match RedisRelay::connect(url, prefix).await {
        Ok(relay) => AnyRelay::Redis(relay),
        Err(e) => {
            tracing::warn!(error = %e, "relay unavailable, falling back to local-only delivery");
            AnyRelay::Local(LocalOnly)
        }
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_url: &str, _prefix: &str) -> AnyRelay {
    tracing::warn!("relay url configured but redis support is not compiled in, running local-only");
    AnyRelay::Local(LocalOnly)
}

impl From<LocalOnly> for AnyRelay {
    fn from(relay: LocalOnly) -> Self {
        Self::Local(relay)
    }
}

impl From<MemoryRelay> for AnyRelay {
    fn from(relay: MemoryRelay) -> Self {
        Self::Memory(relay)
    }
}

#[cfg(feature = "redis")]
impl From<RedisRelay> for AnyRelay {
    fn from(relay: RedisRelay) -> Self {
        Self::Redis(relay)
    }
}

impl Relay for AnyRelay {
    async fn publish(&self, room: &RoomId, payload: &str) -> Result<(), RelayError> {
        match self {
            Self::Local(relay) => relay.publish(room, payload).await,
            Self::Memory(relay) => relay.publish(room, payload).await,
            #[cfg(feature = "redis")]
            Self::Redis(relay) => relay.publish(room, payload).await,
        }
    }

    async fn subscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        match self {
            Self::Local(relay) => relay.subscribe(room).await,
            Self::Memory(relay) => relay.subscribe(room).await,
            #[cfg(feature = "redis")]
            Self::Redis(relay) => relay.subscribe(room).await,
        }
    }

    async fn unsubscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        match self {
            Self::Local(relay) => relay.unsubscribe(room).await,
            Self::Memory(relay) => relay.unsubscribe(room).await,
            #[cfg(feature = "redis")]
            Self::Redis(relay) => relay.unsubscribe(room).await,
        }
    }

    async fn next_message(&self) -> Result<RelayMessage, RelayError> {
        match self {
            Self::Local(relay) => relay.next_message().await,
            Self::Memory(relay) => relay.next_message().await,
            #[cfg(feature = "redis")]
            Self::Redis(relay) => relay.next_message().await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Local(relay) => relay.close().await,
            Self::Memory(relay) => relay.close().await,
            #[cfg(feature = "redis")]
            Self::Redis(relay) => relay.close().await,
        }
    }

    fn is_active(&self) -> bool {
        match self {
            Self::Local(relay) => relay.is_active(),
            Self::Memory(relay) => relay.is_active(),
            #[cfg(feature = "redis")]
            Self::Redis(relay) => relay.is_active(),
        }
    }
}
