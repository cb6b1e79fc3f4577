//! In-process relay: several bridges sharing one broadcast channel behave
//! like several server instances sharing a pub/sub service.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use roomcast_protocol::RoomId;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{Relay, RelayError, RelayMessage};

const DEFAULT_CAPACITY: usize = 1024;

/// The shared "pub/sub service". Cheap to clone; every clone is the same
/// bus.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<RelayMessage>,
}

impl MemoryBus {
    /// A bus that buffers up to `capacity` messages per slow receiver
    /// before it starts dropping (reported as [`RelayError::Lagged`]).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Connects one "instance" to the bus.
    ///
    /// The relay only sees messages published after this call.
    pub fn relay(&self) -> MemoryRelay {
        MemoryRelay {
            tx: self.tx.clone(),
            rx: tokio::sync::Mutex::new(self.tx.subscribe()),
            subscriptions: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// One instance's connection to a [`MemoryBus`].
pub struct MemoryRelay {
    tx: broadcast::Sender<RelayMessage>,
    rx: tokio::sync::Mutex<broadcast::Receiver<RelayMessage>>,
    subscriptions: Mutex<HashSet<RoomId>>,
    closed: AtomicBool,
}

impl MemoryRelay {
    /// Returns `true` if messages for `room` are currently delivered.
    pub fn is_subscribed(&self, room: &RoomId) -> bool {
        self.subscriptions.lock().contains(room)
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::Acquire) {
            Err(RelayError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Relay for MemoryRelay {
    async fn publish(&self, room: &RoomId, payload: &str) -> Result<(), RelayError> {
        self.ensure_open()?;
        // No receivers is not an error: nobody is listening yet.
        let _ = self.tx.send(RelayMessage::new(room.clone(), payload));
        Ok(())
    }

    async fn subscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        self.ensure_open()?;
        self.subscriptions.lock().insert(room.clone());
        Ok(())
    }

    async fn unsubscribe(&self, room: &RoomId) -> Result<(), RelayError> {
        self.subscriptions.lock().remove(room);
        Ok(())
    }

    async fn next_message(&self) -> Result<RelayMessage, RelayError> {
        let mut rx = self.rx.lock().await;
        loop {
            self.ensure_open()?;
            let message = match rx.recv().await {
                Ok(message) => message,
                Err(RecvError::Lagged(n)) => return Err(RelayError::Lagged(n)),
                Err(RecvError::Closed) => return Err(RelayError::Closed),
            };
            if self.is_subscribed(&message.room) {
                return Ok(message);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscriptions.lock().clear();
    }

    fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
