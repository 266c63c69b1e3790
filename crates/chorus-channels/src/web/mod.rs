//! Native real-time web channel.
//!
//! Browser clients connect over a WebSocket, join conversations by id, and
//! exchange JSON envelopes (see [`protocol`]). Fan-out goes through the
//! [`Hub`] actor, which owns every client's outbound buffer and evicts
//! clients that stop reading. Each socket is driven by [`serve`].

mod channel;
mod connection;
mod hub;
pub mod protocol;


pub use channel::{bot_author_id, WebChannelProvider};
pub use connection::{serve, ClientEventHandler, Deadlines};
pub use hub::{BroadcastReport, ConnectionId, Frame, Hub, HubHandle, HubStats};
pub use protocol::{Envelope, EventKind};
