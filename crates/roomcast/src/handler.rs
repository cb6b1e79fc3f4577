//! Per-connection handler: admission, room lifecycle and event routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Resolve room and token from the request target
//!   2. Authenticate and check membership (refusal → close 1008)
//!   3. Register in the room, send history, announce the join
//!   4. Loop: receive client events → persist / broadcast
//!   5. Leave the room, announce it, close (exactly once)

use std::sync::Arc;

use roomcast_protocol::{ClientEvent, Codec, ProtocolError, RoomId, ServerEvent};
use roomcast_relay::Relay;
use roomcast_session::{Authenticator, Identity, MembershipService};
use roomcast_transport::{CloseCode, Connection, WebSocketConnection};

use crate::RoomcastError;
use crate::responder::Responder;
use crate::server::{ROOM_PATH_PREFIX, ServerState};
use crate::store::{MessageStore, StoredMessage, append_blocking, recent_blocking};

/// Runs the departure cleanup once, however the session ends.
///
/// The normal path awaits [`release`](Self::release). If the handler
/// unwinds or its task is dropped first, `Drop` spawns the same cleanup.
struct SessionGuard<A, M, S, B, R>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    state: Arc<ServerState<A, M, S, B, R>>,
    conn: Arc<WebSocketConnection>,
    room: RoomId,
    name: String,
    released: bool,
}

impl<A, M, S, B, R> SessionGuard<A, M, S, B, R>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    async fn release(mut self) {
        self.released = true;
        depart(&self.state, &self.conn, &self.room, &self.name).await;
    }
}

impl<A, M, S, B, R> Drop for SessionGuard<A, M, S, B, R>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let state = Arc::clone(&self.state);
        let conn = Arc::clone(&self.conn);
        let room = self.room.clone();
        let name = std::mem::take(&mut self.name);
        runtime.spawn(async move {
            depart(&state, &conn, &room, &name).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, M, S, B, R>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, M, S, B, R>>,
) -> Result<(), RoomcastError>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    let conn_id = conn.id();
    tracing::debug!(%conn_id, path = %conn.request().path(), "handling new connection");

    // --- Step 1: Admission ---
    let (room, identity) = match admit(&conn, &state).await {
        Ok(admitted) => admitted,
        Err(e) => {
            tracing::info!(%conn_id, error = %e, "connection refused");
            if let Err(close_err) = conn.close(CloseCode::PolicyViolation).await {
                tracing::trace!(%conn_id, error = %close_err, "close after refusal");
            }
            return Err(e);
        }
    };

    // --- Step 2: Join ---
    let conn = Arc::new(conn);
    let members = state.hub.join(&room, Arc::clone(&conn)).await;
    tracing::info!(%conn_id, %room, user = %identity.name, members, "joined room");

    let guard = SessionGuard {
        state: Arc::clone(&state),
        conn: Arc::clone(&conn),
        room: room.clone(),
        name: identity.name.clone(),
        released: false,
    };

    send_history(&state, &conn, &room).await;
    broadcast_event(&state, &room, &ServerEvent::joined(&identity.name)).await;

    // --- Step 3: Event loop ---
    let result = serve(&state, &conn, &room, &identity).await;

    // --- Step 4: Cleanup ---
    guard.release().await;
    result
}

/// Resolves the room and identity, or says why the client is refused.
async fn admit<A, M, S, B, R>(
    conn: &WebSocketConnection,
    state: &ServerState<A, M, S, B, R>,
) -> Result<(RoomId, Identity), RoomcastError>
where
    A: Authenticator,
    M: MembershipService,
    R: Relay,
{
    let request = conn.request();
    let raw_room = request
        .path_suffix(ROOM_PATH_PREFIX)
        .ok_or_else(|| ProtocolError::InvalidRoom(request.path().to_string()))?;
    let room = RoomId::parse(raw_room)?;

    let token = request.query_param("token").unwrap_or_default();
    let identity = state.auth.authenticate(&token).await?;
    state.membership.check(&room, &identity.key).await?;

    Ok((room, identity))
}

/// Reads client events until the peer goes away.
async fn serve<A, M, S, B, R>(
    state: &Arc<ServerState<A, M, S, B, R>>,
    conn: &WebSocketConnection,
    room: &RoomId,
    identity: &Identity,
) -> Result<(), RoomcastError>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    let conn_id = conn.id();
    loop {
        let text = match conn.recv().await {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!(%conn_id, %room, "connection closed cleanly");
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(%conn_id, %room, error = %e, "recv error");
                return Err(e.into());
            }
        };

        let event: ClientEvent = match state.codec.decode(&text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(%conn_id, %room, error = %e, "discarding malformed event");
                continue;
            }
        };

        match event {
            ClientEvent::Chat { msg, file_id } => {
                on_chat(state, room, identity, msg, file_id).await;
            }
            ClientEvent::Typing { status } => {
                broadcast_event(state, room, &ServerEvent::typing(&identity.name, status)).await;
            }
        }
    }
}

/// Persists a chat message, broadcasts it and hands it to the responder.
async fn on_chat<A, M, S, B, R>(
    state: &Arc<ServerState<A, M, S, B, R>>,
    room: &RoomId,
    identity: &Identity,
    msg: String,
    file_id: Option<String>,
) where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    let stored = StoredMessage::new(
        room.clone(),
        &identity.key,
        &identity.name,
        &msg,
        file_id.clone(),
    );
    if let Err(e) = append_blocking(&state.store, stored).await {
        tracing::warn!(%room, user = %identity.name, error = %e, "failed to persist message");
    }

    broadcast_event(state, room, &ServerEvent::chat(&identity.name, &msg, file_id)).await;

    if state.responder.should_respond(&msg) {
        let state = Arc::clone(state);
        let room = room.clone();
        let author = identity.name.clone();
        tokio::spawn(async move {
            bot_reply(state, room, msg, author).await;
        });
    }
}

/// typing on → reply → typing off → post the reply, all through the
/// normal broadcast path.
async fn bot_reply<A, M, S, B, R>(
    state: Arc<ServerState<A, M, S, B, R>>,
    room: RoomId,
    body: String,
    author: String,
) where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
    R: Relay,
{
    let bot = state.settings.bot_name.clone();
    broadcast_event(&state, &room, &ServerEvent::typing(&bot, true)).await;
    let reply = state.responder.respond(&body, &author).await;
    broadcast_event(&state, &room, &ServerEvent::typing(&bot, false)).await;

    let Some(reply) = reply else {
        tracing::debug!(%room, "responder stayed quiet");
        return;
    };

    let stored = StoredMessage::new(room.clone(), &bot, &bot, &reply, None);
    if let Err(e) = append_blocking(&state.store, stored).await {
        tracing::warn!(%room, error = %e, "failed to persist bot reply");
    }
    broadcast_event(&state, &room, &ServerEvent::chat(&bot, reply, None)).await;
}

/// Sends the room's recent messages to the joining connection only.
async fn send_history<A, M, S, B, R>(
    state: &ServerState<A, M, S, B, R>,
    conn: &Arc<WebSocketConnection>,
    room: &RoomId,
) where
    S: MessageStore,
    R: Relay,
{
    let messages = match recent_blocking(&state.store, room, state.settings.history_limit).await {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(%room, error = %e, "failed to load history");
            Vec::new()
        }
    };
    let event = ServerEvent::History {
        messages: messages.iter().map(StoredMessage::to_history).collect(),
    };
    match state.codec.encode(&event) {
        Ok(text) => {
            state.hub.send_one(conn, &text).await;
        }
        Err(e) => tracing::warn!(%room, error = %e, "failed to encode history"),
    }
}

/// Encodes `event` and broadcasts it to the room on every instance.
async fn broadcast_event<A, M, S, B, R: Relay>(
    state: &ServerState<A, M, S, B, R>,
    room: &RoomId,
    event: &ServerEvent,
) {
    match state.codec.encode(event) {
        Ok(text) => {
            let delivery = state.hub.broadcast(room, &text).await;
            if delivery.evicted > 0 {
                tracing::debug!(%room, evicted = delivery.evicted, "dropped dead connections");
            }
        }
        Err(e) => tracing::warn!(%room, error = %e, "failed to encode event"),
    }
}

/// Unregisters the connection, announces the departure and closes.
async fn depart<A, M, S, B, R: Relay>(
    state: &ServerState<A, M, S, B, R>,
    conn: &WebSocketConnection,
    room: &RoomId,
    name: &str,
) {
    let conn_id = conn.id();
    state.hub.leave(Some(room), conn_id).await;
    broadcast_event(state, room, &ServerEvent::left(name)).await;
    if let Err(e) = conn.close(CloseCode::Normal).await {
        tracing::trace!(%conn_id, error = %e, "close on departure");
    }
    tracing::info!(%conn_id, %room, user = %name, "left room");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;
    use roomcast_protocol::JsonCodec;
    use roomcast_relay::{LocalOnly, RelayBridge};
    use roomcast_session::{RoomDirectory, TokenTable};
    use roomcast_transport::{Pending, Transport, WebSocketTransport};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use super::*;
    use crate::responder::Silent;
    use crate::server::Settings;
    use crate::store::MemoryStore;

    type TestState = ServerState<TokenTable, RoomDirectory, MemoryStore, Silent, LocalOnly>;
    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const WAIT: Duration = Duration::from_secs(3);

    fn state() -> Arc<TestState> {
        Arc::new(ServerState {
            hub: Arc::new(RelayBridge::new(LocalOnly)),
            auth: TokenTable::new(),
            membership: RoomDirectory::open(),
            store: Arc::new(MemoryStore::new()),
            responder: Silent,
            codec: JsonCodec,
            settings: Settings {
                history_limit: 10,
                bot_name: "bot".into(),
            },
        })
    }

    async fn connect(transport: &mut WebSocketTransport) -> (Arc<WebSocketConnection>, Client) {
        let url = format!("ws://{}/ws/lobby", transport.local_addr().unwrap());
        let (accepted, client) = tokio::join!(
            async { transport.accept().await.unwrap().complete().await.unwrap() },
            tokio_tungstenite::connect_async(url),
        );
        let (client, _) = client.unwrap();
        (Arc::new(accepted), client)
    }

    /// Two members of `lobby`: alice, whose guard is returned, and an
    /// observer.
    async fn session(
        state: &Arc<TestState>,
    ) -> (SessionGuard<TokenTable, RoomDirectory, MemoryStore, Silent, LocalOnly>, Vec<Client>) {
        let room = RoomId::parse("lobby").unwrap();
        let mut transport = WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
        let (alice, alice_client) = connect(&mut transport).await;
        let (observer, observer_client) = connect(&mut transport).await;
        state.hub.join(&room, Arc::clone(&alice)).await;
        state.hub.join(&room, observer).await;

        let guard = SessionGuard {
            state: Arc::clone(state),
            conn: alice,
            room,
            name: "alice".into(),
            released: false,
        };
        (guard, vec![alice_client, observer_client])
    }

    async fn wait_for_members(state: &TestState, expected: usize) {
        let room = RoomId::parse("lobby").unwrap();
        tokio::time::timeout(WAIT, async {
            while state.hub.registry().count(Some(&room)).await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("membership should settle");
    }

    /// Counts "{name} left" notices until the client goes quiet.
    async fn departures(client: &mut Client, name: &str) -> usize {
        let notice = format!("{name} left");
        let mut seen = 0;
        while let Ok(Some(Ok(message))) =
            tokio::time::timeout(Duration::from_millis(300), client.next()).await
        {
            if let Message::Text(text) = message {
                if text.as_str().contains(&notice) {
                    seen += 1;
                }
            }
        }
        seen
    }

    #[tokio::test]
    async fn test_aborted_session_departs_once() {
        let state = state();
        let (guard, mut clients) = session(&state).await;
        wait_for_members(&state, 2).await;

        let task = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });
        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        wait_for_members(&state, 1).await;
        assert_eq!(departures(&mut clients[1], "alice").await, 1);
    }

    #[tokio::test]
    async fn test_released_session_is_not_departed_again_on_drop() {
        let state = state();
        let (guard, mut clients) = session(&state).await;
        wait_for_members(&state, 2).await;

        guard.release().await;

        wait_for_members(&state, 1).await;
        assert_eq!(departures(&mut clients[1], "alice").await, 1);
    }
}
