//! Room fan-out core for Roomcast.
//!
//! Two pieces, both local to one server process:
//!
//! - [`Registry`]: room → set of live connection handles, behind a single
//!   exclusion scope that is never held across I/O.
//! - [`Broadcaster`]: sends a payload to a snapshot of a room's members
//!   and evicts any handle whose send fails.
//!
//! Cross-instance delivery is layered on top by `roomcast-relay`.

mod broadcaster;
mod registry;

pub use broadcaster::{Broadcaster, DEFAULT_SEND_TIMEOUT, Delivery};
pub use registry::{Registry, Removal};
