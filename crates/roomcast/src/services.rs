//! The external collaborators a server talks to, bundled for the builder.

use std::sync::Arc;

use roomcast_session::{Authenticator, MembershipService, RoomDirectory};

use crate::responder::{Responder, Silent};
use crate::store::{MemoryStore, MessageStore};

/// Auth, membership, message store and responder.
///
/// Only the authenticator is required; the rest default to an open
/// [`RoomDirectory`], an in-memory [`MemoryStore`] and the [`Silent`]
/// responder.
///
/// ```rust
/// use roomcast::prelude::*;
///
/// let auth = TokenTable::new().with("t-alice", Identity::new("u1", "alice"));
/// let services = Services::new(auth)
///     .with_membership(RoomDirectory::open())
///     .with_responder(EchoResponder);
/// # let _ = services;
/// ```
pub struct Services<A, M = RoomDirectory, S = MemoryStore, B = Silent> {
    pub(crate) auth: A,
    pub(crate) membership: M,
    pub(crate) store: Arc<S>,
    pub(crate) responder: B,
}

impl<A: Authenticator> Services<A> {
    pub fn new(auth: A) -> Self {
        Self {
            auth,
            membership: RoomDirectory::open(),
            store: Arc::new(MemoryStore::new()),
            responder: Silent,
        }
    }
}

impl<A, M, S, B> Services<A, M, S, B>
where
    A: Authenticator,
    M: MembershipService,
    S: MessageStore,
    B: Responder,
{
    pub fn with_membership<M2: MembershipService>(self, membership: M2) -> Services<A, M2, S, B> {
        Services {
            auth: self.auth,
            membership,
            store: self.store,
            responder: self.responder,
        }
    }

    pub fn with_store<S2: MessageStore>(self, store: S2) -> Services<A, M, S2, B> {
        self.with_shared_store(Arc::new(store))
    }

    /// Like [`with_store`](Self::with_store), keeping a handle for the
    /// caller.
    pub fn with_shared_store<S2: MessageStore>(self, store: Arc<S2>) -> Services<A, M, S2, B> {
        Services {
            auth: self.auth,
            membership: self.membership,
            store,
            responder: self.responder,
        }
    }

    pub fn with_responder<B2: Responder>(self, responder: B2) -> Services<A, M, S, B2> {
        Services {
            auth: self.auth,
            membership: self.membership,
            store: self.store,
            responder,
        }
    }

    /// The message store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
