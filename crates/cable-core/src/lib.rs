//! cable-core — contracts and leaf types for the Cable client.
//!
//! # Overview
//!
//! Cable maintains one multiplexed real-time connection to an
//! ActionCable-style pub/sub server and exposes many independent logical
//! subscriptions over it. The core crate defines:
//!
//! - [`Transport`] — the duplex message transport contract
//! - [`Encoder`] — the wire payload codec contract (JSON default)
//! - [`Command`] / [`Frame`] — wire types and identifier derivation
//! - [`CableError`] — structured error type
//! - [`policy`] module — reconnect backoff schedule
//! - [`ClientConfig`] — recognized options

pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod policy;
pub mod transport;

pub use config::{ClientConfig, ProtocolKind, ReconnectStrategy, TokenRefresher};
pub use encoder::{Encoder, JsonEncoder};
pub use error::CableError;
pub use frame::{Command, CommandKind, Frame, FrameKind, Identifier};
pub use policy::{BackoffConfig, BackoffPolicy};
pub use transport::{Transport, TransportEvent};
