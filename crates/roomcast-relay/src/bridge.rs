//! The relay bridge: room membership plus cross-instance fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use roomcast_protocol::RoomId;
use roomcast_room::{Broadcaster, Delivery, Registry, Removal};
use roomcast_transport::{Connection, ConnectionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::backoff::backoff;
use crate::{Relay, RelayMessage};

/// State shared between the bridge and its listener task.
struct Shared<C: Connection, R: Relay> {
    broadcaster: Broadcaster<C>,
    relay: R,
    /// Rooms this instance is subscribed to. Held across subscribe and
    /// unsubscribe calls so the set always matches the relay.
    subscriptions: tokio::sync::Mutex<HashSet<RoomId>>,
}

impl<C: Connection, R: Relay> Shared<C, R> {
    fn registry(&self) -> &Arc<Registry<C>> {
        self.broadcaster.registry()
    }

    /// Subscribes to `room` unless already subscribed. Returns whether a
    /// subscription is in place afterwards.
    async fn ensure_subscribed(&self, room: &RoomId) -> bool {
        if !self.relay.is_active() {
            return false;
        }
        let mut subscriptions = self.subscriptions.lock().await;
        if subscriptions.contains(room) {
            return true;
        }
        match self.relay.subscribe(room).await {
            Ok(()) => {
                tracing::debug!(%room, "relay subscribed");
                subscriptions.insert(room.clone());
                true
            }
            Err(e) => {
                tracing::warn!(%room, error = %e, "relay subscribe failed, room delivers locally");
                false
            }
        }
    }

    /// Drops the subscription for `room` if no local member is left.
    ///
    /// Re-checks the registry under the subscription lock: a join that
    /// raced ahead keeps the subscription, one that comes after
    /// re-subscribes.
    async fn release_if_empty(&self, room: &RoomId) {
        let mut subscriptions = self.subscriptions.lock().await;
        if !subscriptions.contains(room) || self.registry().count(Some(room)).await > 0 {
            return;
        }
        subscriptions.remove(room);
        match self.relay.unsubscribe(room).await {
            Ok(()) => tracing::debug!(%room, "relay unsubscribed"),
            Err(e) => tracing::debug!(%room, error = %e, "relay unsubscribe failed"),
        }
    }

    async fn release_all(&self, rooms: &[RoomId]) {
        for room in rooms {
            self.release_if_empty(room).await;
        }
    }

    /// Fans out to local members only.
    async fn deliver_local(&self, room: &RoomId, payload: &str) -> Delivery {
        let delivery = self.broadcaster.broadcast(room, payload).await;
        self.release_all(&delivery.emptied).await;
        delivery
    }
}

/// Room membership and broadcast for one server instance.
///
/// Wraps the local [`Registry`] and [`Broadcaster`] and keeps a relay
/// subscription for every room with at least one local member. Session
/// code only talks to the bridge; whether a relay is active is invisible
/// to it.
///
/// # Routing
///
/// | relay | room subscribed here | broadcast does |
/// |---|---|---|
/// | inactive | n/a | local fan-out |
/// | active | yes | publish; local members get it back via the listener |
/// | active | no | publish and local fan-out |
/// | publish fails | any | local fan-out |
pub struct RelayBridge<C: Connection, R: Relay> {
    shared: Arc<Shared<C, R>>,
    cancel: CancellationToken,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connection, R: Relay> RelayBridge<C, R> {
    /// Creates a bridge over an empty registry. Call
    /// [`start`](Self::start) to begin receiving relayed messages.
    pub fn new(relay: R) -> Self {
        Self::with_registry(Arc::new(Registry::new()), relay)
    }

    /// Creates a bridge over an existing registry.
    pub fn with_registry(registry: Arc<Registry<C>>, relay: R) -> Self {
        Self::with_broadcaster(Broadcaster::new(registry), relay)
    }

    /// Creates a bridge that fans out through `broadcaster`, for example
    /// one with a custom send timeout.
    pub fn with_broadcaster(broadcaster: Broadcaster<C>, relay: R) -> Self {
        Self {
            shared: Arc::new(Shared {
                broadcaster,
                relay,
                subscriptions: tokio::sync::Mutex::new(HashSet::new()),
            }),
            cancel: CancellationToken::new(),
            listener: Mutex::new(None),
        }
    }

    /// Spawns the listener task if the relay is active. Calling it again,
    /// or after [`shutdown`](Self::shutdown), does nothing.
    pub fn start(&self) {
        if !self.shared.relay.is_active() || self.cancel.is_cancelled() {
            return;
        }
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        *listener = Some(tokio::spawn(listen(shared, cancel)));
        tracing::debug!("relay listener started");
    }

    /// The local connection registry.
    pub fn registry(&self) -> &Arc<Registry<C>> {
        self.shared.registry()
    }

    /// The underlying relay.
    pub fn relay(&self) -> &R {
        &self.shared.relay
    }

    /// Returns `true` if this instance holds a relay subscription for
    /// `room`.
    pub async fn is_subscribed(&self, room: &RoomId) -> bool {
        self.shared.subscriptions.lock().await.contains(room)
    }

    /// Registers `handle` in `room` and makes sure the room is
    /// subscribed. Returns the room's local member count.
    pub async fn join(&self, room: &RoomId, handle: Arc<C>) -> usize {
        let count = self.shared.registry().join(room, handle).await;
        self.shared.ensure_subscribed(room).await;
        count
    }

    /// Unregisters `id` from `room` (or from every room) and releases
    /// subscriptions for rooms left without local members.
    pub async fn leave(&self, room: Option<&RoomId>, id: ConnectionId) -> Removal {
        let removal = self.shared.registry().leave(room, id).await;
        self.shared.release_all(&removal.emptied).await;
        removal
    }

    /// Broadcasts `payload` to every member of `room` on every instance.
    ///
    /// The returned [`Delivery`] covers local fan-out done by this call;
    /// it's empty when delivery is left to the listener.
    pub async fn broadcast(&self, room: &RoomId, payload: &str) -> Delivery {
        let shared = &self.shared;
        if shared.relay.is_active() {
            // A room with local members but no subscription (the relay was
            // down when they joined) gets another subscribe attempt.
            let mut subscribed = self.is_subscribed(room).await;
            if !subscribed && shared.registry().has_room(room).await {
                subscribed = shared.ensure_subscribed(room).await;
            }

            match shared.relay.publish(room, payload).await {
                Ok(()) if subscribed => return Delivery::default(),
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(%room, error = %e, "relay publish failed, delivering locally");
                }
            }
        }
        shared.deliver_local(room, payload).await
    }

    /// Sends `payload` to one local handle. Never relayed.
    pub async fn send_one(&self, handle: &Arc<C>, payload: &str) -> Delivery {
        let delivery = self.shared.broadcaster.send_one(handle, payload).await;
        self.shared.release_all(&delivery.emptied).await;
        delivery
    }

    /// Stops the listener and waits for it, drops every subscription and
    /// closes the relay.
    ///
    /// Idempotent, and safe when [`start`](Self::start) was never called.
    /// Connections are left alone.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                tracing::warn!(error = %e, "relay listener panicked");
            }
        }

        let rooms: Vec<RoomId> = self.shared.subscriptions.lock().await.drain().collect();
        for room in &rooms {
            if let Err(e) = self.shared.relay.unsubscribe(room).await {
                tracing::debug!(%room, error = %e, "unsubscribe during shutdown failed");
            }
        }
        self.shared.relay.close().await;
        tracing::debug!(released = rooms.len(), "relay bridge shut down");
    }
}

impl<C: Connection, R: Relay> Drop for RelayBridge<C, R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How often the listener drops lanes of rooms with no local members.
const LANE_PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Per-room delivery queue owned by the listener.
struct Lane {
    tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// Pulls relayed messages and hands each to its room's lane until
/// cancelled.
///
/// The listener itself never waits on a send or on a relay command: a
/// room whose members are slow only delays its own lane, and the relay
/// can always hand over the next message.
async fn listen<C: Connection, R: Relay>(shared: Arc<Shared<C, R>>, cancel: CancellationToken) {
    let mut lanes: HashMap<RoomId, Lane> = HashMap::new();
    let mut prune = tokio::time::interval(LANE_PRUNE_INTERVAL);
    prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = prune.tick() => {
                prune_lanes(&shared, &mut lanes).await;
                continue;
            }
            next = shared.relay.next_message() => next,
        };

        match next {
            Ok(message) => {
                failures = 0;
                let RelayMessage { room, payload } = message;
                let lane = lanes
                    .entry(room.clone())
                    .or_insert_with(|| open_lane(&shared, room.clone(), &cancel));
                if let Err(mpsc::error::SendError(payload)) = lane.tx.send(payload) {
                    // The lane stopped on its own; start over with a fresh one.
                    let fresh = open_lane(&shared, room.clone(), &cancel);
                    let _ = fresh.tx.send(payload);
                    lanes.insert(room, fresh);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "relay receive failed");
                let delay = backoff(failures);
                failures = failures.saturating_add(1);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    let tasks: Vec<JoinHandle<()>> = lanes.into_values().map(|lane| lane.task).collect();
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "relay lane panicked");
        }
    }
    tracing::debug!("relay listener stopped");
}

fn open_lane<C: Connection, R: Relay>(
    shared: &Arc<Shared<C, R>>,
    room: RoomId,
    cancel: &CancellationToken,
) -> Lane {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let shared = Arc::clone(shared);
    let cancel = cancel.clone();
    let task = tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => break,
                payload = rx.recv() => match payload {
                    Some(payload) => payload,
                    None => break,
                },
            };
            let delivery = shared.deliver_local(&room, &payload).await;
            tracing::trace!(%room, delivered = delivery.delivered, "relayed message delivered");
        }
    });
    Lane { tx, task }
}

/// Closes lanes of rooms that no longer have local members. A closed lane
/// finishes what it has queued and exits.
async fn prune_lanes<C: Connection, R: Relay>(
    shared: &Shared<C, R>,
    lanes: &mut HashMap<RoomId, Lane>,
) {
    let mut idle = Vec::new();
    for room in lanes.keys() {
        if !shared.registry().has_room(room).await {
            idle.push(room.clone());
        }
    }
    for room in idle {
        lanes.remove(&room);
    }
}
