//! `RoomcastServer` builder and server loop.
//!
//! This is the entry point for running a Roomcast server. It ties
//! together all the layers: transport → session → relay bridge → room.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use roomcast_protocol::JsonCodec;
use roomcast_relay::{LocalOnly, Relay, RelayBridge};
use roomcast_room::{Broadcaster, DEFAULT_SEND_TIMEOUT, Registry};
use roomcast_session::{Authenticator, MembershipService, RoomDirectory, TokenTable};
use roomcast_transport::{
    DEFAULT_HANDSHAKE_TIMEOUT, Pending, Transport, WebSocketConnection, WebSocketTransport,
};

use crate::RoomcastError;
use crate::config::{DEFAULT_HISTORY_LIMIT, RoomcastConfig};
use crate::handler::handle_connection;
use crate::responder::{DEFAULT_BOT_NAME, Responder, Silent};
use crate::services::Services;
use crate::store::{MemoryStore, MessageStore};

/// Path prefix clients connect to: `/ws/{room}?token=...`.
pub const ROOM_PATH_PREFIX: &str = "/ws/";

/// The room hub shared by every connection: registry, fan-out and relay.
pub type Hub<R> = RelayBridge<WebSocketConnection, R>;

pub(crate) struct Settings {
    pub(crate) history_limit: usize,
    pub(crate) bot_name: String,
}

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks.
pub(crate) struct ServerState<A, M, S, B, R: Relay> {
    pub(crate) hub: Arc<Hub<R>>,
    pub(crate) auth: A,
    pub(crate) membership: M,
    pub(crate) store: Arc<S>,
    pub(crate) responder: B,
    pub(crate) codec: JsonCodec,
    pub(crate) settings: Settings,
}

/// Builder for configuring and starting a Roomcast server.
///
/// # Example
///
/// ```rust,no_run
/// use roomcast::prelude::*;
///
/// # async fn run() -> Result<(), RoomcastError> {
/// let auth = TokenTable::new().with("t-alice", Identity::new("u1", "alice"));
/// let server = RoomcastServer::builder()
///     .bind("0.0.0.0:8080")
///     .history_limit(50)
///     .build(Services::new(auth), LocalOnly)
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RoomcastServerBuilder {
    bind_addr: String,
    history_limit: usize,
    bot_name: String,
    handshake_timeout: Duration,
    send_timeout: Duration,
}

impl RoomcastServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            bot_name: DEFAULT_BOT_NAME.to_string(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Takes the `[server]` settings from a loaded config.
    pub fn config(self, config: &RoomcastConfig) -> Self {
        self.bind(&config.server.bind)
            .history_limit(config.server.history_limit)
            .bot_name(config.server.bot_name.clone())
            .handshake_timeout(Duration::from_secs(config.server.handshake_timeout_secs))
            .send_timeout(Duration::from_millis(config.server.send_timeout_ms))
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets how many past messages a joining client receives.
    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Sets the display name used for responder messages.
    pub fn bot_name(mut self, name: impl Into<String>) -> Self {
        self.bot_name = name.into();
        self
    }

    /// Sets how long a new peer gets to complete the WebSocket upgrade.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets how long one outbound frame may take before the peer is
    /// dropped from its room.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Binds the listener and starts the relay listener.
    ///
    /// Binding is the only step that can fail; an inactive relay just
    /// means local-only delivery.
    pub async fn build<A, M, S, B, R>(
        self,
        services: Services<A, M, S, B>,
        relay: R,
    ) -> Result<RoomcastServer<A, M, S, B, R>, RoomcastError>
    where
        A: Authenticator,
        M: MembershipService,
        S: MessageStore,
        B: Responder,
        R: Relay,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr)
            .await?
            .with_handshake_timeout(self.handshake_timeout);

        let broadcaster =
            Broadcaster::new(Arc::new(Registry::new())).with_send_timeout(self.send_timeout);
        let hub = Arc::new(RelayBridge::with_broadcaster(broadcaster, relay));
        hub.start();
        tracing::info!(
            addr = %self.bind_addr,
            relay_active = hub.relay().is_active(),
            "server bound"
        );

        let state = Arc::new(ServerState {
            hub,
            auth: services.auth,
            membership: services.membership,
            store: services.store,
            responder: services.responder,
            codec: JsonCodec,
            settings: Settings {
                history_limit: self.history_limit,
                bot_name: self.bot_name,
            },
        });

        Ok(RoomcastServer { transport, state })
    }
}

impl Default for RoomcastServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Roomcast server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct RoomcastServer<A, M, S, B, R: Relay> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, M, S, B, R>>,
}

// The concrete parameters only give `RoomcastServer::builder()` a type to
// resolve against; `build` picks the real ones.
impl RoomcastServer<TokenTable, RoomDirectory, MemoryStore, Silent, LocalOnly> {
    /// Creates a new builder.
    pub fn builder() -> RoomcastServerBuilder {
        RoomcastServerBuilder::new()
    }
}

impl<A, M, S, B, R> RoomcastServer<A, M, S, B, R>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The room hub: local registry plus relay bridge.
    pub fn hub(&self) -> &Arc<Hub<R>> {
        &self.state.hub
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), RoomcastError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` completes, then shuts the relay
    /// bridge down.
    ///
    /// Each accepted peer gets its own task, which also runs the WebSocket
    /// handshake, so a peer that never upgrades holds up nobody. Sessions already
    /// running are not cut off; they finish and clean up on their own.
    pub async fn run_until<F>(mut self, signal: F) -> Result<(), RoomcastError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Roomcast server running");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            let conn = match pending.complete().await {
                                Ok(conn) => conn,
                                Err(e) => {
                                    tracing::debug!(error = %e, "handshake failed");
                                    return;
                                }
                            };
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
            }
        }

        tracing::info!("shutting down");
        self.state.hub.shutdown().await;
        Ok(())
    }
}
