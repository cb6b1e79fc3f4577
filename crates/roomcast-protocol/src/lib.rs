//! Wire protocol for Roomcast.
//!
//! This crate defines the "language" that chat clients and servers speak:
//!
//! - **Types** ([`ServerEvent`], [`ClientEvent`], [`HistoryEntry`],
//!   [`RoomId`]): the event structures that travel in text frames and
//!   through the relay.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those events are
//!   converted to and from text.
//! - **Errors** ([`ProtocolError`]): what can go wrong while doing so.
//!
//! ```text
//! Transport (text frames) → Protocol (events) → Room fan-out
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{ClientEvent, HistoryEntry, RoomId, ServerEvent, SYSTEM_USER};
