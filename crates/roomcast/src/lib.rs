//! # Roomcast
//!
//! Room-based real-time chat relay over WebSockets.
//!
//! Clients connect to `/ws/{room}?token=...`, are authenticated and
//! admitted, receive the room's recent history, and then exchange chat
//! and typing events with everyone else in the room. With a relay
//! configured, several server instances share rooms: a broadcast on one
//! instance reaches members connected to any of them.
//!
//! The external collaborators (authentication, room membership, message
//! storage, automated responder) are traits; bundled implementations
//! cover development and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomcast::prelude::*;
//!
//! # async fn run() -> Result<(), RoomcastError> {
//! let auth = TokenTable::new().with("t-alice", Identity::new("u1", "alice"));
//! let relay = AnyRelay::connect(None, DEFAULT_CHANNEL_PREFIX).await;
//!
//! let server = RoomcastServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(Services::new(auth), relay)
//!     .await?;
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod responder;
mod server;
mod services;
mod store;

pub use config::{
    BotConfig, ConfigError, DEFAULT_HISTORY_LIMIT, RelayConfig, RoomEntry, RoomcastConfig,
    ServerConfig, TokenEntry,
};
pub use error::RoomcastError;
pub use responder::{DEFAULT_BOT_NAME, EchoResponder, Responder, Silent, is_mention, strip_mention};
pub use server::{Hub, ROOM_PATH_PREFIX, RoomcastServer, RoomcastServerBuilder};
pub use services::Services;
pub use store::{MemoryStore, MessageStore, StoreError, StoredMessage};

/// Everything needed to configure and run a server.
pub mod prelude {
    pub use crate::{
        ConfigError, DEFAULT_BOT_NAME, DEFAULT_HISTORY_LIMIT, EchoResponder, Hub, MemoryStore,
        MessageStore, Responder, RoomcastConfig, RoomcastError, RoomcastServer,
        RoomcastServerBuilder, Services, Silent, StoreError, StoredMessage,
    };

    pub use roomcast_protocol::{ClientEvent, HistoryEntry, RoomId, ServerEvent};
    pub use roomcast_relay::{
        AnyRelay, DEFAULT_CHANNEL_PREFIX, LocalOnly, MemoryBus, MemoryRelay, Relay, RelayBridge,
        RelayError,
    };
    pub use roomcast_session::{
        Authenticator, Identity, MembershipService, RoomDirectory, SessionError, TokenTable,
    };
    pub use roomcast_transport::{CloseCode, ConnectionId};
}
