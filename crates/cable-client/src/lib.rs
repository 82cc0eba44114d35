//! Multiplexed pub/sub client core: one connection, many channels.
//!
//! A single background task owns the transport, the protocol dispatcher,
//! the channel hub and the health monitor. User-facing handles
//! ([`Connection`], [`Channel`]) are thin command senders; results and
//! events come back asynchronously, so no lock is ever held across an
//! await point and inbound frames are processed strictly in order.
//!
//! The transport and codec are injected through the traits in
//! [`cable_core`]; `cable-ws` provides the WebSocket implementation and a
//! one-call `connect` entry point.

pub mod adapter;
pub mod channel;
pub mod connection;
pub mod protocol;

mod hub;
mod monitor;

pub use adapter::{attach_hooks, ChannelHooks};
pub use channel::{Channel, ChannelEvent, ChannelState};
pub use connection::{Connection, ConnectionState, TOKEN_EXPIRED};
pub use protocol::{Protocol, ProtocolEvent};
