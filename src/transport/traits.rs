//! Transport trait abstraction for pluggable socket backends

use async_trait::async_trait;
use spp_shared::PeerId;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// A connected socket that can read and write bytes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the socket gracefully
    async fn close(&mut self) -> io::Result<()>;
}

/// Socket handle as owned by a connect attempt or a session
pub type BoxedStream = Box<dyn TransportStream>;

/// Factory for connected sockets bound to the serial-profile service
///
/// Both strategies may block for as long as the platform handshake takes.
/// Dropping the returned future abandons the attempt and releases any
/// partially opened socket.
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Connect through the standard service lookup
    async fn connect_primary(&self, peer: &PeerId) -> io::Result<BoxedStream>;

    /// Alternate construction path, tried once when the primary fails
    async fn connect_fallback(&self, peer: &PeerId) -> io::Result<BoxedStream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Discovery collaborator, told to stand down before every connect
pub trait Discovery: Send + Sync + 'static {
    /// Best-effort, must not block
    fn cancel_discovery(&self);
}

/// Discovery for transports that never scan
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDiscovery;

impl Discovery for NoDiscovery {
    fn cancel_discovery(&self) {}
}
