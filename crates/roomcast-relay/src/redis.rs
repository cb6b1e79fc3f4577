//! Redis pub/sub relay.
//!
//! Publishing goes through one multiplexed connection, reopened lazily
//! after a failure. Subscriptions live on a dedicated pub/sub connection
//! owned by a driver task: it applies subscribe/unsubscribe commands in
//! order, forwards inbound messages to [`Relay::next_message`], and on
//! connection loss reconnects with backoff and re-subscribes every known
//! channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::{MultiplexedConnection, PubSub};
use roomcast_protocol::RoomId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backoff::backoff;
use crate::{Relay, RelayError, RelayMessage};

/// Prefix of the per-room channel name: `roomcast:room:{room}`.
pub const DEFAULT_CHANNEL_PREFIX: &str = "roomcast:room:";

const INBOUND_CAPACITY: usize = 1024;

type Ack = oneshot::Sender<Result<(), RelayError>>;

enum Command {
    Subscribe(String, Ack),
    Unsubscribe(String, Ack),
}

/// Relay backed by a Redis server.
pub struct RedisRelay {
    client: redis::Client,
    prefix: String,
    publisher: tokio::sync::Mutex<Option<MultiplexedConnection>>,
    commands: mpsc::UnboundedSender<Command>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<RelayMessage>>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    driver: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RedisRelay {
    /// Connects to `url` (`redis://host:port/db`) and starts the pub/sub
    /// driver.
    ///
    /// Both connections are opened up front so an unreachable server is
    /// reported here rather than on the first broadcast.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        let pubsub = client.get_async_pubsub().await?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let prefix = prefix.into();

        let driver = Driver {
            client: client.clone(),
            prefix: prefix.clone(),
            channels: ChannelSet::default(),
            commands: commands_rx,
            inbound: inbound_tx,
            connected: Arc::clone(&connected),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(driver.run(pubsub));

        tracing::info!(%prefix, "redis relay connected");

        Ok(Self {
            client,
            prefix,
            publisher: tokio::sync::Mutex::new(Some(publisher)),
            commands: commands_tx,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            connected,
            cancel,
            driver: parking_lot::Mutex::new(Some(handle)),
        })
    }

    /// The channel name for `room`.
    pub fn channel(&self, room: &RoomId) -> String {
        format!("{}{}", self.prefix, room)
    }

    async fn publisher(&self) -> Result<MultiplexedConnection, RelayError> {
        let mut slot = self.publisher.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn command(
        &self,
        make: impl FnOnce(Ack) -> Command,
    ) -> Result<(), RelayError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(make(ack_tx))
            .map_err(|_| RelayError::Closed)?;
        ack_rx.await.map_err(|_| RelayError::Closed)?
    }
}

impl Relay for RedisRelay {
    async fn publish(&self, room: &RoomId, payload: &str) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            return Err(RelayError::Closed);
        }
        let mut conn = self.publisher().await?;
        let published: redis::RedisResult<i64> = conn.publish(self.channel(room), payload).await;
        if let Err(e) = published {
            *self.publisher.lock().await = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn subscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        let channel = self.channel(room);
        self.command(|ack| Command::Subscribe(channel, ack)).await
    }

    async fn unsubscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        let channel = self.channel(room);
        self.command(|ack| Command::Unsubscribe(channel, ack)).await
    }

    async fn next_message(&self) -> Result<RelayMessage, RelayError> {
        self.inbound
            .lock()
            .await
            .recv()
            .await
            .ok_or(RelayError::Closed)
    }

    async fn close(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "redis relay driver panicked");
            }
        }
        *self.publisher.lock().await = None;
        self.connected.store(false, Ordering::Release);
    }

    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && self.connected.load(Ordering::Acquire)
    }
}

/// Channels the driver is subscribed to, restored after a reconnect.
#[derive(Debug, Default)]
struct ChannelSet {
    active: HashSet<String>,
}

impl ChannelSet {
    fn contains(&self, channel: &str) -> bool {
        self.active.contains(channel)
    }

    fn insert(&mut self, channel: String) {
        self.active.insert(channel);
    }

    /// Returns `true` if the channel was known, meaning an UNSUBSCRIBE
    /// has to go out.
    fn remove(&mut self, channel: &str) -> bool {
        self.active.remove(channel)
    }

    fn len(&self) -> usize {
        self.active.len()
    }

    fn iter(&self) -> impl Iterator<Item = &str> {
        self.active.iter().map(String::as_str)
    }

    /// Answers a command while the pub/sub connection is down. Subscribes
    /// are refused so the bridge keeps delivering locally. Unsubscribes
    /// succeed and the channel is forgotten, so the reconnect doesn't
    /// bring it back.
    fn reject(&mut self, command: Command) {
        match command {
            Command::Subscribe(channel, ack) => {
                let _ = ack.send(Err(RelayError::Unavailable(format!(
                    "pub/sub disconnected, cannot subscribe {channel}"
                ))));
            }
            Command::Unsubscribe(channel, ack) => {
                self.active.remove(&channel);
                let _ = ack.send(Ok(()));
            }
        }
    }
}

/// Owns the pub/sub connection.
struct Driver {
    client: redis::Client,
    prefix: String,
    channels: ChannelSet,
    commands: mpsc::UnboundedReceiver<Command>,
    inbound: mpsc::Sender<RelayMessage>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

enum Event {
    Stop,
    Command(Command),
    Message(Option<redis::Msg>),
    Forward(Result<mpsc::OwnedPermit<RelayMessage>, mpsc::error::SendError<()>>),
    Reconnect,
}

impl Driver {
    /// Serves commands, forwards messages and reconnects until cancelled.
    ///
    /// At most one inbound message waits for room in the inbound queue.
    /// While it waits no further message is read, but commands are still
    /// served, so a listener that is itself waiting on a command ack can
    /// always make progress.
    async fn run(mut self, pubsub: PubSub) {
        let mut pubsub = Some(pubsub);
        let mut backlog: Option<RelayMessage> = None;
        let mut attempt: u32 = 0;

        loop {
            let event = {
                let mut messages = pubsub.as_mut().map(|conn| Box::pin(conn.on_message()));
                let connected = messages.is_some();
                tokio::select! {
                    _ = self.cancel.cancelled() => Event::Stop,
                    command = self.commands.recv() => match command {
                        Some(command) => Event::Command(command),
                        None => Event::Stop,
                    },
                    permit = self.inbound.clone().reserve_owned(), if backlog.is_some() => {
                        Event::Forward(permit)
                    }
                    message = next_message(&mut messages), if connected && backlog.is_none() => {
                        Event::Message(message)
                    }
                    _ = tokio::time::sleep(backoff(attempt)), if !connected => Event::Reconnect,
                }
            };

            match event {
                Event::Stop => break,
                Event::Command(command) => match pubsub.as_mut() {
                    Some(conn) => {
                        if let Err(e) = self.apply(conn, command).await {
                            tracing::warn!(error = %e, "redis pub/sub command failed, reconnecting");
                            self.disconnected(&mut pubsub);
                        }
                    }
                    None => self.channels.reject(command),
                },
                Event::Message(Some(message)) => backlog = self.parse(message),
                Event::Message(None) => {
                    tracing::warn!("redis pub/sub connection lost, reconnecting");
                    self.disconnected(&mut pubsub);
                }
                Event::Forward(Ok(permit)) => {
                    if let Some(message) = backlog.take() {
                        permit.send(message);
                    }
                }
                // The relay is gone; nobody reads inbound messages any more.
                Event::Forward(Err(_)) => break,
                Event::Reconnect => {
                    attempt = attempt.saturating_add(1);
                    match self.reconnect().await {
                        Ok(restored) => {
                            tracing::info!(channels = self.channels.len(), "redis pub/sub reconnected");
                            pubsub = Some(restored);
                            attempt = 0;
                            self.connected.store(true, Ordering::Release);
                        }
                        Err(e) => tracing::warn!(error = %e, attempt, "redis pub/sub reconnect failed"),
                    }
                }
            }
        }

        self.connected.store(false, Ordering::Release);
        tracing::debug!("redis relay driver stopped");
    }

    fn disconnected(&self, pubsub: &mut Option<PubSub>) {
        *pubsub = None;
        self.connected.store(false, Ordering::Release);
    }

    async fn reconnect(&self) -> redis::RedisResult<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in self.channels.iter() {
            pubsub.subscribe(channel).await?;
        }
        Ok(pubsub)
    }

    /// Applies one command and acks it. Returns the Redis error, if any,
    /// so the caller can treat the connection as broken.
    async fn apply(&mut self, pubsub: &mut PubSub, command: Command) -> redis::RedisResult<()> {
        match command {
            Command::Subscribe(channel, ack) => {
                if self.channels.contains(&channel) {
                    let _ = ack.send(Ok(()));
                    return Ok(());
                }
                match pubsub.subscribe(channel.as_str()).await {
                    Ok(()) => {
                        tracing::debug!(%channel, "subscribed");
                        self.channels.insert(channel);
                        let _ = ack.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = ack.send(Err(RelayError::Unavailable(e.to_string())));
                        Err(e)
                    }
                }
            }
            Command::Unsubscribe(channel, ack) => {
                if !self.channels.remove(&channel) {
                    let _ = ack.send(Ok(()));
                    return Ok(());
                }
                match pubsub.unsubscribe(channel.as_str()).await {
                    Ok(()) => {
                        tracing::debug!(%channel, "unsubscribed");
                        let _ = ack.send(Ok(()));
                        Ok(())
                    }
                    // Already forgotten locally; a reconnect won't restore it.
                    Err(e) => {
                        let _ = ack.send(Err(RelayError::Unavailable(e.to_string())));
                        Err(e)
                    }
                }
            }
        }
    }

    fn parse(&self, message: redis::Msg) -> Option<RelayMessage> {
        let channel = message.get_channel_name();
        let room = match room_from_channel(&self.prefix, channel) {
            Ok(room) => room,
            Err(e) => {
                tracing::warn!(error = %e, "dropping relay message");
                return None;
            }
        };
        match message.get_payload::<String>() {
            Ok(payload) => Some(RelayMessage { room, payload }),
            Err(e) => {
                tracing::warn!(%room, error = %e, "dropping non-text relay payload");
                None
            }
        }
    }
}

async fn next_message<S>(messages: &mut Option<S>) -> Option<redis::Msg>
where
    S: futures_util::Stream<Item = redis::Msg> + Unpin,
{
    match messages {
        Some(messages) => messages.next().await,
        None => std::future::pending().await,
    }
}

fn room_from_channel(prefix: &str, channel: &str) -> Result<RoomId, RelayError> {
    channel
        .strip_prefix(prefix)
        .and_then(|room| RoomId::parse(room).ok())
        .ok_or_else(|| RelayError::InvalidChannel(channel.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_from_channel() {
        let room = room_from_channel(DEFAULT_CHANNEL_PREFIX, "roomcast:room:lobby").unwrap();
        assert_eq!(room.as_str(), "lobby");
    }

    #[test]
    fn test_room_from_foreign_channel_is_rejected() {
        assert!(matches!(
            room_from_channel(DEFAULT_CHANNEL_PREFIX, "other:lobby"),
            Err(RelayError::InvalidChannel(_))
        ));
        assert!(matches!(
            room_from_channel(DEFAULT_CHANNEL_PREFIX, "roomcast:room:"),
            Err(RelayError::InvalidChannel(_))
        ));
    }

    fn ack() -> (Ack, oneshot::Receiver<Result<(), RelayError>>) {
        oneshot::channel()
    }

    #[test]
    fn test_unsubscribe_while_disconnected_forgets_channel() {
        let mut channels = ChannelSet::default();
        channels.insert("roomcast:room:a".into());
        channels.insert("roomcast:room:b".into());

        let (tx, mut rx) = ack();
        channels.reject(Command::Unsubscribe("roomcast:room:a".into(), tx));

        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        let restored: Vec<&str> = channels.iter().collect();
        assert_eq!(restored, vec!["roomcast:room:b"]);
    }

    #[test]
    fn test_subscribe_while_disconnected_is_refused() {
        let mut channels = ChannelSet::default();

        let (tx, mut rx) = ack();
        channels.reject(Command::Subscribe("roomcast:room:a".into(), tx));

        assert!(matches!(rx.try_recv(), Ok(Err(RelayError::Unavailable(_)))));
        assert_eq!(channels.len(), 0);
    }

    #[test]
    fn test_unsubscribe_of_unknown_channel_needs_no_command() {
        let mut channels = ChannelSet::default();
        channels.insert("roomcast:room:a".into());

        assert!(!channels.remove("roomcast:room:zzz"));
        assert!(channels.remove("roomcast:room:a"));
        assert!(!channels.contains("roomcast:room:a"));

        // Unsubscribing an unknown channel while down is still acked.
        let (tx, mut rx) = ack();
        channels.reject(Command::Unsubscribe("roomcast:room:zzz".into(), tx));
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_server_fails() {
        let result = RedisRelay::connect("redis://127.0.0.1:1/", DEFAULT_CHANNEL_PREFIX).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisRelay::connect("not a url", DEFAULT_CHANNEL_PREFIX).await;
        assert!(matches!(result, Err(RelayError::Redis(_))));
    }
}
