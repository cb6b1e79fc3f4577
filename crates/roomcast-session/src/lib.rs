//! Identity and admission for Roomcast.
//!
//! This crate answers the two questions asked before a connection is
//! registered into a room:
//!
//! 1. **Who is this?**: [`Authenticator`] resolves a bearer token into an
//!    [`Identity`].
//! 2. **May they join?**: [`MembershipService`] checks the room.
//!
//! Both are contracts for external services. [`TokenTable`] and
//! [`RoomDirectory`] are static implementations for development and tests.
//!
//! ```text
//! Lifecycle controller (above)  ← refuses with a policy-violation close
//!     ↕
//! Session layer (this crate)    ← identity + admission
//!     ↕
//! Protocol layer (below)        ← RoomId
//! ```

mod auth;
mod error;
mod membership;

pub use auth::{Authenticator, Identity, TokenTable};
pub use error::SessionError;
pub use membership::{MembershipService, RoomDirectory};
