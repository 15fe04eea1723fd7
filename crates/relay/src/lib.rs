//! Realtime chat relay.
//!
//! The relay never renders or stores chat history itself: every message is
//! verified against the backend, durably persisted there, and only then fanned
//! out to the connections currently in the room. [`ConnectionRegistry`] tracks
//! who is where; [`RelayDispatcher`] applies the per-event rules.

pub mod dispatcher;
pub mod events;
pub mod registry;

pub use dispatcher::RelayDispatcher;
pub use events::{ClientEvent, ServerEvent};
pub use registry::{ConnectionId, ConnectionRegistry};
