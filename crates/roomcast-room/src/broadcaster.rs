//! Local fan-out: deliver one payload to every local member of a room.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use roomcast_protocol::RoomId;
use roomcast_transport::{CloseCode, Connection};

use crate::Registry;

/// How long one send may take before the peer counts as failed.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one fan-out.
///
/// Failed recipients are already unregistered and closed by the time this
/// is returned; the summary exists for logging and for the relay bridge,
/// which releases subscriptions for `emptied` rooms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Handles the payload was delivered to.
    pub delivered: usize,
    /// Handles whose send failed and that were evicted.
    pub evicted: usize,
    /// Rooms deleted from the registry because an eviction emptied them.
    pub emptied: Vec<RoomId>,
}

impl Delivery {
    fn absorb(&mut self, other: Delivery) {
        self.delivered += other.delivered;
        self.evicted += other.evicted;
        self.emptied.extend(other.emptied);
    }
}

/// Delivers payloads to the local members of a room.
///
/// A send failure is never reported as an error: the failing handle is
/// removed from every room and its close is attempted, so it receives no
/// further broadcasts. A send that doesn't finish within the send timeout
/// (a peer that stopped reading) is a failure too.
pub struct Broadcaster<C: Connection> {
    registry: Arc<Registry<C>>,
    send_timeout: Duration,
}

impl<C: Connection> Broadcaster<C> {
    /// Creates a broadcaster over `registry`.
    pub fn new(registry: Arc<Registry<C>>) -> Self {
        Self {
            registry,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Sets the per-send deadline.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// The registry this broadcaster reads from.
    pub fn registry(&self) -> &Arc<Registry<C>> {
        &self.registry
    }

    /// Sends `payload` to every handle currently registered in `room`.
    ///
    /// Takes a snapshot and sends to all members concurrently. An empty
    /// room is a no-op.
    pub async fn broadcast(&self, room: &RoomId, payload: &str) -> Delivery {
        let members = self.registry.snapshot(room).await;
        if members.is_empty() {
            return Delivery::default();
        }

        let results = join_all(members.iter().map(|handle| async move {
            self.send_bounded(handle, payload)
                .await
                .map_err(|reason| (Arc::clone(handle), reason))
        }))
        .await;

        let mut delivery = Delivery::default();
        for result in results {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err((handle, reason)) => {
                    tracing::debug!(
                        %room,
                        conn_id = %handle.id(),
                        error = %reason,
                        "send failed, evicting connection"
                    );
                    delivery.absorb(self.evict(&handle).await);
                }
            }
        }
        delivery
    }

    /// Sends `payload` to a single handle with the same failure policy as
    /// [`broadcast`](Self::broadcast).
    pub async fn send_one(&self, handle: &Arc<C>, payload: &str) -> Delivery {
        match self.send_bounded(handle, payload).await {
            Ok(()) => Delivery {
                delivered: 1,
                ..Delivery::default()
            },
            Err(reason) => {
                tracing::debug!(
                    conn_id = %handle.id(),
                    error = %reason,
                    "targeted send failed, evicting connection"
                );
                self.evict(handle).await
            }
        }
    }

    async fn send_bounded(&self, handle: &Arc<C>, payload: &str) -> Result<(), String> {
        match tokio::time::timeout(self.send_timeout, handle.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("send timed out after {:?}", self.send_timeout)),
        }
    }

    /// Unregisters `handle` from every room and attempts to close it.
    /// Close errors and a close that hangs are both given up on.
    async fn evict(&self, handle: &Arc<C>) -> Delivery {
        let removal = self.registry.leave(None, handle.id()).await;
        match tokio::time::timeout(self.send_timeout, handle.close(CloseCode::GoingAway)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::trace!(conn_id = %handle.id(), error = %e, "close after failed send");
            }
            Err(_) => tracing::trace!(conn_id = %handle.id(), "close after failed send timed out"),
        }
        Delivery {
            delivered: 0,
            evicted: 1,
            emptied: removal.emptied,
        }
    }
}
