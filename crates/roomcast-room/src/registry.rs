//! Connection registry: which live connections are in which room.

use std::collections::HashMap;
use std::sync::Arc;

use roomcast_protocol::RoomId;
use roomcast_transport::{Connection, ConnectionId};
use tokio::sync::Mutex;

/// Where a handle was removed from by [`Registry::leave`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    /// Rooms the handle was actually a member of.
    pub rooms: Vec<RoomId>,
    /// Subset of `rooms` whose entry was deleted because it became empty.
    pub emptied: Vec<RoomId>,
}

impl Removal {
    /// Returns `true` if the handle wasn't registered anywhere it was
    /// looked for.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// In-memory mapping from room to the set of connection handles in it.
///
/// Every read and write goes through one mutex, held only for the map
/// operation itself. Nothing in here awaits I/O; sends happen on
/// [`snapshot`](Self::snapshot) copies after the lock is released.
///
/// ## Invariants
///
/// - A handle appears only in rooms it explicitly joined.
/// - A room entry exists only while it has at least one member; the last
///   [`leave`](Self::leave) deletes it.
///
/// One registry is constructed per process and shared by reference
/// (`Arc`) with every session task and the relay bridge.
pub struct Registry<C: Connection> {
    rooms: Mutex<HashMap<RoomId, HashMap<ConnectionId, Arc<C>>>>,
}

impl<C: Connection> Registry<C> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Adds `handle` to `room`, creating the room entry if absent.
    ///
    /// Joining a room the handle is already in is a no-op. Returns the
    /// room's member count afterwards.
    pub async fn join(&self, room: &RoomId, handle: Arc<C>) -> usize {
        let id = handle.id();
        let mut rooms = self.rooms.lock().await;
        let members = rooms.entry(room.clone()).or_default();
        members.entry(id).or_insert(handle);
        let count = members.len();
        drop(rooms);

        tracing::debug!(%room, conn_id = %id, members = count, "joined room");
        count
    }

    /// Removes the handle with `id` from `room`, or from every room when
    /// `room` is `None`.
    ///
    /// Removing a handle that isn't present is a no-op. Rooms left empty
    /// are deleted.
    pub async fn leave(&self, room: Option<&RoomId>, id: ConnectionId) -> Removal {
        let mut removal = Removal::default();
        let mut rooms = self.rooms.lock().await;

        match room {
            Some(room) => {
                if let Some(members) = rooms.get_mut(room) {
                    if members.remove(&id).is_some() {
                        removal.rooms.push(room.clone());
                        if members.is_empty() {
                            rooms.remove(room);
                            removal.emptied.push(room.clone());
                        }
                    }
                }
            }
            None => {
                rooms.retain(|room, members| {
                    if members.remove(&id).is_some() {
                        removal.rooms.push(room.clone());
                        if members.is_empty() {
                            removal.emptied.push(room.clone());
                            return false;
                        }
                    }
                    true
                });
            }
        }
        drop(rooms);

        if !removal.is_empty() {
            tracing::debug!(
                conn_id = %id,
                rooms = removal.rooms.len(),
                emptied = removal.emptied.len(),
                "left rooms"
            );
        }
        removal
    }

    /// Returns a copy of the room's current members.
    ///
    /// The copy is decoupled from the live set: callers iterate and send
    /// without holding the registry lock, and concurrent joins/leaves do
    /// not affect it.
    pub async fn snapshot(&self, room: &RoomId) -> Vec<Arc<C>> {
        self.rooms
            .lock()
            .await
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Member count of one room, or the total across all rooms.
    ///
    /// A connection in two rooms counts twice in the total.
    pub async fn count(&self, room: Option<&RoomId>) -> usize {
        let rooms = self.rooms.lock().await;
        match room {
            Some(room) => rooms.get(room).map_or(0, HashMap::len),
            None => rooms.values().map(HashMap::len).sum(),
        }
    }

    /// Returns `true` if `id` is registered in `room` (or anywhere, for
    /// `None`).
    pub async fn contains(&self, room: Option<&RoomId>, id: ConnectionId) -> bool {
        let rooms = self.rooms.lock().await;
        match room {
            Some(room) => rooms.get(room).is_some_and(|m| m.contains_key(&id)),
            None => rooms.values().any(|m| m.contains_key(&id)),
        }
    }

    /// Returns `true` if `room` has an entry (i.e. at least one member).
    pub async fn has_room(&self, room: &RoomId) -> bool {
        self.rooms.lock().await.contains_key(room)
    }

    /// Lists rooms that currently have members.
    pub async fn rooms(&self) -> Vec<RoomId> {
        self.rooms.lock().await.keys().cloned().collect()
    }
}

impl<C: Connection> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
