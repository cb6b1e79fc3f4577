//! Integration tests for the relay bridge: local-only delivery, publish
//! failure fallback, multi-instance delivery over a shared bus and the
//! subscription lifecycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use roomcast_protocol::RoomId;
use roomcast_relay::{LocalOnly, MemoryBus, MemoryRelay, Relay, RelayBridge, RelayError, RelayMessage};
use roomcast_room::{Broadcaster, Registry};
use tokio::sync::mpsc;
use roomcast_transport::{CloseCode, Connection, ConnectionId, TransportError};

// =========================================================================
// Test doubles
// =========================================================================

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct MockConn {
    id: ConnectionId,
    sent: Mutex<Vec<String>>,
    broken: AtomicBool,
    stalled: AtomicBool,
}

impl MockConn {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed)),
            sent: Mutex::new(Vec::new()),
            broken: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
        })
    }

    fn broken() -> Arc<Self> {
        let conn = Self::new();
        conn.broken.store(true, Ordering::SeqCst);
        conn
    }

    /// A peer that stopped reading: sends never complete.
    fn stalled() -> Arc<Self> {
        let conn = Self::new();
        conn.stalled.store(true, Ordering::SeqCst);
        conn
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connection for MockConn {
    type Error = TransportError;

    async fn send(&self, text: &str) -> Result<(), TransportError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::Send("gone".into()));
        }
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn close(&self, _code: CloseCode) -> Result<(), TransportError> {
        Ok(())
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// An active relay that records calls. Publishing can be made to fail;
/// nothing is ever received.
#[derive(Default)]
struct RecordingRelay {
    fail_publish: AtomicBool,
    published: AtomicUsize,
    subscribes: Mutex<Vec<RoomId>>,
    unsubscribes: Mutex<Vec<RoomId>>,
    closed: AtomicUsize,
}

impl RecordingRelay {
    fn failing() -> Self {
        let relay = Self::default();
        relay.fail_publish.store(true, Ordering::SeqCst);
        relay
    }
}

impl Relay for RecordingRelay {
    async fn publish(&self, _room: &RoomId, _payload: &str) -> Result<(), RelayError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(RelayError::Unavailable("forced".into()));
        }
        self.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        self.subscribes.lock().unwrap().push(room.clone());
        Ok(())
    }

    async fn unsubscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        self.unsubscribes.lock().unwrap().push(room.clone());
        Ok(())
    }

    async fn next_message(&self) -> Result<RelayMessage, RelayError> {
        std::future::pending().await
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        true
    }
}

/// A relay fed from a bounded queue, like the Redis driver's inbound
/// channel. `unsubscribe` only completes once that queue has been drained,
/// the way a driver busy forwarding only gets to commands afterwards.
struct QueueRelay {
    tx: mpsc::Sender<RelayMessage>,
    rx: tokio::sync::Mutex<mpsc::Receiver<RelayMessage>>,
    unsubscribes: Mutex<Vec<RoomId>>,
}

impl QueueRelay {
    fn new(capacity: usize) -> (Self, mpsc::Sender<RelayMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        let relay = Self {
            tx: tx.clone(),
            rx: tokio::sync::Mutex::new(rx),
            unsubscribes: Mutex::new(Vec::new()),
        };
        (relay, tx)
    }
}

impl Relay for QueueRelay {
    async fn publish(&self, _room: &RoomId, _payload: &str) -> Result<(), RelayError> {
        Ok(())
    }

    async fn subscribe(&self, _room: &RoomId) -> Result<(), RelayError> {
        Ok(())
    }

    async fn unsubscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        while self.tx.capacity() < self.tx.max_capacity() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.unsubscribes.lock().unwrap().push(room.clone());
        Ok(())
    }

    async fn next_message(&self) -> Result<RelayMessage, RelayError> {
        self.rx.lock().await.recv().await.ok_or(RelayError::Closed)
    }

    async fn close(&self) {}

    fn is_active(&self) -> bool {
        true
    }
}

// =========================================================================
// Helpers
// =========================================================================

fn room(name: &str) -> RoomId {
    RoomId::parse(name).unwrap()
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn received(conn: &Arc<MockConn>, n: usize) -> bool {
    let conn = Arc::clone(conn);
    eventually(move || {
        let conn = Arc::clone(&conn);
        async move { conn.sent().len() >= n }
    })
    .await
}

fn instance(bus: &MemoryBus) -> RelayBridge<MockConn, MemoryRelay> {
    let bridge = RelayBridge::new(bus.relay());
    bridge.start();
    bridge
}

// =========================================================================
// Local-only and fallback
// =========================================================================

#[tokio::test]
async fn test_local_only_broadcast_reaches_all_members() {
    let bridge: RelayBridge<MockConn, LocalOnly> = RelayBridge::new(LocalOnly);
    bridge.start();
    let a = MockConn::new();
    let b = MockConn::new();
    bridge.join(&room("r1"), Arc::clone(&a)).await;
    bridge.join(&room("r1"), Arc::clone(&b)).await;

    let delivery = bridge.broadcast(&room("r1"), "hi").await;

    assert_eq!(delivery.delivered, 2);
    assert_eq!(a.sent(), vec!["hi"]);
    assert_eq!(b.sent(), vec!["hi"]);
    assert!(!bridge.is_subscribed(&room("r1")).await);
}

#[tokio::test]
async fn test_publish_failure_falls_back_to_local_delivery() {
    let bridge = RelayBridge::new(RecordingRelay::failing());
    let a = MockConn::new();
    let b = MockConn::new();
    bridge.join(&room("r1"), Arc::clone(&a)).await;
    bridge.join(&room("r1"), Arc::clone(&b)).await;
    assert!(bridge.is_subscribed(&room("r1")).await);

    let delivery = bridge.broadcast(&room("r1"), "still here").await;

    assert_eq!(delivery.delivered, 2);
    assert_eq!(a.sent(), vec!["still here"]);
    assert_eq!(b.sent(), vec!["still here"]);
}

#[tokio::test]
async fn test_successful_publish_leaves_delivery_to_listener() {
    let bridge = RelayBridge::new(RecordingRelay::default());
    let a = MockConn::new();
    bridge.join(&room("r1"), Arc::clone(&a)).await;

    let delivery = bridge.broadcast(&room("r1"), "via relay").await;

    assert_eq!(delivery.delivered, 0);
    assert_eq!(bridge.relay().published.load(Ordering::SeqCst), 1);
    assert!(a.sent().is_empty(), "no direct delivery when subscribed");
}

#[tokio::test]
async fn test_broadcast_to_unsubscribed_room_publishes_without_subscribing() {
    let bridge: RelayBridge<MockConn, _> = RelayBridge::new(RecordingRelay::default());

    let delivery = bridge.broadcast(&room("elsewhere"), "for remote members").await;

    assert_eq!(delivery.delivered, 0);
    assert_eq!(bridge.relay().published.load(Ordering::SeqCst), 1);
    assert!(bridge.relay().subscribes.lock().unwrap().is_empty());
}

// =========================================================================
// Subscription lifecycle
// =========================================================================

#[tokio::test]
async fn test_subscribe_once_per_room() {
    let bridge = RelayBridge::new(RecordingRelay::default());
    bridge.join(&room("r1"), MockConn::new()).await;
    bridge.join(&room("r1"), MockConn::new()).await;
    bridge.join(&room("r2"), MockConn::new()).await;

    let subscribes = bridge.relay().subscribes.lock().unwrap().clone();
    assert_eq!(subscribes, vec![room("r1"), room("r2")]);
}

#[tokio::test]
async fn test_unsubscribe_when_last_local_member_leaves() {
    let bridge = RelayBridge::new(RecordingRelay::default());
    let a = MockConn::new();
    let b = MockConn::new();
    bridge.join(&room("r1"), Arc::clone(&a)).await;
    bridge.join(&room("r1"), Arc::clone(&b)).await;

    bridge.leave(Some(&room("r1")), a.id()).await;
    assert!(bridge.is_subscribed(&room("r1")).await);
    assert!(bridge.relay().unsubscribes.lock().unwrap().is_empty());

    bridge.leave(None, b.id()).await;
    assert!(!bridge.is_subscribed(&room("r1")).await);
    assert_eq!(*bridge.relay().unsubscribes.lock().unwrap(), vec![room("r1")]);
}

#[tokio::test]
async fn test_eviction_that_empties_room_releases_subscription() {
    let bridge = RelayBridge::new(RecordingRelay::failing());
    let dead = MockConn::new();
    dead.broken.store(true, Ordering::SeqCst);
    bridge.join(&room("r1"), Arc::clone(&dead)).await;

    let delivery = bridge.broadcast(&room("r1"), "anyone?").await;

    assert_eq!(delivery.evicted, 1);
    assert_eq!(bridge.registry().count(Some(&room("r1"))).await, 0);
    assert!(!bridge.is_subscribed(&room("r1")).await);
}

#[tokio::test]
async fn test_rejoin_after_release_resubscribes() {
    let bridge = RelayBridge::new(RecordingRelay::default());
    let a = MockConn::new();
    bridge.join(&room("r1"), Arc::clone(&a)).await;
    bridge.leave(None, a.id()).await;
    bridge.join(&room("r1"), Arc::clone(&a)).await;

    assert!(bridge.is_subscribed(&room("r1")).await);
    assert_eq!(bridge.relay().subscribes.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_shutdown_releases_everything_and_is_idempotent() {
    let bridge = RelayBridge::new(RecordingRelay::default());
    bridge.start();
    bridge.join(&room("r1"), MockConn::new()).await;
    bridge.join(&room("r2"), MockConn::new()).await;

    bridge.shutdown().await;
    bridge.shutdown().await;

    let mut unsubscribed = bridge.relay().unsubscribes.lock().unwrap().clone();
    unsubscribed.sort();
    assert_eq!(unsubscribed, vec![room("r1"), room("r2")]);
    assert_eq!(bridge.relay().closed.load(Ordering::SeqCst), 2);
    // Connections are left registered; sessions finish on their own.
    assert_eq!(bridge.registry().count(None).await, 2);
}

#[tokio::test]
async fn test_shutdown_without_start_is_safe() {
    let bridge: RelayBridge<MockConn, LocalOnly> = RelayBridge::new(LocalOnly);
    bridge.shutdown().await;
}

// =========================================================================
// Multiple instances over a shared bus
// =========================================================================

#[tokio::test]
async fn test_broadcast_reaches_members_on_every_instance_once() {
    let bus = MemoryBus::default();
    let one = instance(&bus);
    let two = instance(&bus);
    let a = MockConn::new();
    let b = MockConn::new();
    let c = MockConn::new();
    one.join(&room("r1"), Arc::clone(&a)).await;
    two.join(&room("r1"), Arc::clone(&b)).await;
    two.join(&room("r2"), Arc::clone(&c)).await;

    one.broadcast(&room("r1"), "hello everyone").await;

    assert!(received(&a, 1).await);
    assert!(received(&b, 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.sent(), vec!["hello everyone"], "origin delivers exactly once");
    assert_eq!(b.sent(), vec!["hello everyone"]);
    assert!(c.sent().is_empty());

    one.shutdown().await;
    two.shutdown().await;
}

#[tokio::test]
async fn test_relayed_broadcasts_keep_publish_order() {
    let bus = MemoryBus::default();
    let one = instance(&bus);
    let two = instance(&bus);
    let remote = MockConn::new();
    two.join(&room("r1"), Arc::clone(&remote)).await;

    for i in 0..25 {
        one.broadcast(&room("r1"), &format!("m{i}")).await;
    }

    assert!(received(&remote, 25).await);
    let expected: Vec<String> = (0..25).map(|i| format!("m{i}")).collect();
    assert_eq!(remote.sent(), expected);

    one.shutdown().await;
    two.shutdown().await;
}

#[tokio::test]
async fn test_instance_without_members_does_not_receive() {
    let bus = MemoryBus::default();
    let one = instance(&bus);
    let two = instance(&bus);
    let a = MockConn::new();
    one.join(&room("r1"), Arc::clone(&a)).await;

    two.broadcast(&room("r1"), "from two").await;

    assert!(received(&a, 1).await);
    assert!(!two.relay().is_subscribed(&room("r1")));
    assert!(one.relay().is_subscribed(&room("r1")));

    one.shutdown().await;
    two.shutdown().await;
}

#[tokio::test]
async fn test_shut_down_instance_degrades_to_local_delivery() {
    let bus = MemoryBus::default();
    let one = instance(&bus);
    let a = MockConn::new();
    one.join(&room("r1"), Arc::clone(&a)).await;

    one.shutdown().await;
    let delivery = one.broadcast(&room("r1"), "after shutdown").await;

    assert_eq!(delivery.delivered, 1);
    assert_eq!(a.sent(), vec!["after shutdown"]);
}

// =========================================================================
// Slow peers
// =========================================================================

#[tokio::test]
async fn test_stalled_room_does_not_hold_up_other_rooms() {
    let bus = MemoryBus::default();
    let broadcaster = Broadcaster::new(Arc::new(Registry::new()))
        .with_send_timeout(Duration::from_millis(300));
    let bridge = RelayBridge::with_broadcaster(broadcaster, bus.relay());
    bridge.start();

    let stuck = MockConn::stalled();
    let healthy = MockConn::new();
    bridge.join(&room("r1"), Arc::clone(&stuck)).await;
    bridge.join(&room("r2"), Arc::clone(&healthy)).await;

    bridge.broadcast(&room("r1"), "to stalled room").await;
    bridge.broadcast(&room("r2"), "to healthy room").await;

    // Well inside the stalled send's deadline.
    let quick = tokio::time::timeout(Duration::from_millis(200), async {
        while healthy.sent().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(quick.is_ok(), "r2 must not wait for r1's stalled peer");
    assert_eq!(healthy.sent(), vec!["to healthy room"]);

    // The stalled peer is evicted once its send times out.
    let registry = Arc::clone(bridge.registry());
    let stuck_id = stuck.id();
    assert!(
        eventually(move || {
            let registry = Arc::clone(&registry);
            async move { !registry.contains(None, stuck_id).await }
        })
        .await
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_release_waiting_on_relay_does_not_stall_listener() {
    let (relay, inbound) = QueueRelay::new(1);
    let bridge = RelayBridge::new(relay);
    bridge.start();

    let doomed = MockConn::broken();
    let healthy = MockConn::new();
    bridge.join(&room("x"), Arc::clone(&doomed)).await;
    bridge.join(&room("y"), Arc::clone(&healthy)).await;

    // The first message evicts the only member of `x`, so the bridge
    // unsubscribes while the queue is still filling up.
    let producer = tokio::spawn(async move {
        inbound.send(RelayMessage::new(room("x"), "boom")).await.unwrap();
        for i in 0..50 {
            inbound
                .send(RelayMessage::new(room("y"), format!("m{i}")))
                .await
                .unwrap();
        }
    });

    assert!(received(&healthy, 50).await, "listener must keep draining the relay");
    producer.await.unwrap();
    let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
    assert_eq!(healthy.sent(), expected);

    let bridge = Arc::new(bridge);
    let watched = Arc::clone(&bridge);
    assert!(
        eventually(move || {
            let bridge = Arc::clone(&watched);
            async move { bridge.relay().unsubscribes.lock().unwrap().contains(&room("x")) }
        })
        .await
    );
    assert!(!bridge.is_subscribed(&room("x")).await);
}
