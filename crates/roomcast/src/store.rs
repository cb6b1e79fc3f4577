//! Message history and persistence.
//!
//! Durable storage lives outside Roomcast. [`MessageStore`] is the
//! contract the lifecycle controller needs from it: record a chat message,
//! and return a room's most recent messages when someone joins. The
//! contract is synchronous (database drivers usually are); the controller
//! runs every call on the blocking pool so a slow store never stalls
//! connection tasks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use roomcast_protocol::{HistoryEntry, RoomId};

/// Errors from a [`MessageStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store refused or failed the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub room: RoomId,
    /// Stable key of the author.
    pub user_key: String,
    /// Display name of the author at the time of posting.
    pub user: String,
    pub msg: String,
    pub file_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// A message posted now.
    pub fn new(
        room: RoomId,
        user_key: impl Into<String>,
        user: impl Into<String>,
        msg: impl Into<String>,
        file_id: Option<String>,
    ) -> Self {
        Self {
            room,
            user_key: user_key.into(),
            user: user.into(),
            msg: msg.into(),
            file_id,
            timestamp: Utc::now(),
        }
    }

    /// The entry sent to clients in a `history` event.
    pub fn to_history(&self) -> HistoryEntry {
        HistoryEntry {
            user: self.user.clone(),
            msg: self.msg.clone(),
            file_id: self.file_id.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// History service and persistence sink.
pub trait MessageStore: Send + Sync + 'static {
    /// Records one message.
    fn append(&self, message: StoredMessage) -> Result<(), StoreError>;

    /// The `limit` most recent messages of `room`, oldest first.
    fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Runs [`MessageStore::append`] on the blocking pool.
pub(crate) async fn append_blocking<S: MessageStore>(
    store: &Arc<S>,
    message: StoredMessage,
) -> Result<(), StoreError> {
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || store.append(message)).await?
}

/// Runs [`MessageStore::recent`] on the blocking pool.
pub(crate) async fn recent_blocking<S: MessageStore>(
    store: &Arc<S>,
    room: &RoomId,
    limit: usize,
) -> Result<Vec<StoredMessage>, StoreError> {
    let store = Arc::clone(store);
    let room = room.clone();
    tokio::task::spawn_blocking(move || store.recent(&room, limit)).await?
}

const DEFAULT_ROOM_CAPACITY: usize = 1000;

/// An in-memory store keeping the latest messages of each room.
///
/// Older messages are dropped once a room holds `capacity` of them.
/// Nothing survives a restart.
#[derive(Debug)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<RoomId, VecDeque<StoredMessage>>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ROOM_CAPACITY)
    }

    /// A store that keeps at most `capacity` messages per room.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of messages currently kept for `room`.
    pub fn len(&self, room: &RoomId) -> usize {
        self.rooms.lock().get(room).map_or(0, VecDeque::len)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for MemoryStore {
    fn append(&self, message: StoredMessage) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock();
        let messages = rooms.entry(message.room.clone()).or_default();
        if messages.len() == self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
        Ok(())
    }

    fn recent(&self, room: &RoomId, limit: usize) -> Result<Vec<StoredMessage>, StoreError> {
        let rooms = self.rooms.lock();
        let Some(messages) = rooms.get(room) else {
            return Ok(Vec::new());
        };
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.iter().skip(skip).cloned().collect())
    }
}
