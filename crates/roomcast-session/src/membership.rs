//! Room membership: may this identity join this room?

use std::collections::{HashMap, HashSet};
use std::future::Future;

use roomcast_protocol::RoomId;

use crate::SessionError;

/// Answers whether a user may join a room.
///
/// Room ownership and invitations live outside Roomcast; this trait is the
/// narrow question the lifecycle controller asks before registering a
/// connection.
pub trait MembershipService: Send + Sync + 'static {
    /// `Ok(())` when `user_key` may join `room`.
    ///
    /// # Errors
    /// - [`SessionError::RoomNotFound`]: no such room
    /// - [`SessionError::NotMember`]: the room exists, the user isn't in it
    fn check(
        &self,
        room: &RoomId,
        user_key: &str,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// A static room → member table.
///
/// [`RoomDirectory::open`] admits everyone into every room; a directory
/// built with [`RoomDirectory::with_room`] only admits listed members of
/// listed rooms.
#[derive(Debug, Clone, Default)]
pub struct RoomDirectory {
    /// `None` means open: any room, any user.
    rooms: Option<HashMap<RoomId, HashSet<String>>>,
}

impl RoomDirectory {
    /// A directory that admits anyone into any room.
    pub fn open() -> Self {
        Self { rooms: None }
    }

    /// A closed directory with no rooms yet.
    pub fn closed() -> Self {
        Self {
            rooms: Some(HashMap::new()),
        }
    }

    /// Adds a room with its member keys, closing the directory if it was
    /// open.
    pub fn with_room<I, S>(mut self, room: RoomId, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rooms
            .get_or_insert_with(HashMap::new)
            .insert(room, members.into_iter().map(Into::into).collect());
        self
    }

    /// Returns `true` if every room is open to everyone.
    pub fn is_open(&self) -> bool {
        self.rooms.is_none()
    }
}

impl MembershipService for RoomDirectory {
    async fn check(&self, room: &RoomId, user_key: &str) -> Result<(), SessionError> {
        let Some(rooms) = &self.rooms else {
            return Ok(());
        };
        let members = rooms
            .get(room)
            .ok_or_else(|| SessionError::RoomNotFound(room.clone()))?;
        if members.contains(user_key) {
            Ok(())
        } else {
            tracing::debug!(%room, user = user_key, "membership refused");
            Err(SessionError::NotMember {
                user: user_key.to_string(),
                room: room.clone(),
            })
        }
    }
}
