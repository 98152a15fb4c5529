//! SPP Link
//!
//! Manages one connection at a time to a Bluetooth Serial Port Profile
//! peer: asynchronous connect with a fallback strategy, a session that
//! streams inbound bytes to an [`EventListener`](connection::EventListener),
//! serialized writes, loss detection, and clean teardown.

pub mod connection;
pub mod transport;

pub use connection::{
    event_channel, ConnectionConfig, ConnectionEvent, ConnectionManager, EventListener,
    LinkStatus, ReadStrategy, WriteOutcome,
};
pub use spp_shared::{link, LinkError, LinkState, PeerId};
