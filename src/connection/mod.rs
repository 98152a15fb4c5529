//! Connection management for a single serial-profile link
//!
//! This module handles:
//! - Non-blocking connect with a primary and a fallback strategy
//! - A session read loop that streams inbound bytes to a listener
//! - Serialized writes that never hold the state lock
//! - Loss detection and cooperative teardown on cancellation

mod connect_worker;
mod connected_worker;
mod listener;
mod manager;

pub use listener::{event_channel, ChannelListener, ConnectionEvent, EventListener};
pub use manager::{ConnectionConfig, ConnectionManager, LinkStatus, ReadStrategy, WriteOutcome};
