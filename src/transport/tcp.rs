//! TCP transport implementation for developing without a radio

use crate::transport::traits::{BoxedStream, TransportConnector, TransportStream};
use async_trait::async_trait;
use spp_shared::PeerId;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tracing::debug;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        Self { inner: stream }
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TcpTransportStream {
    async fn close(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }
}

/// Configuration for the TCP simulation transport
#[derive(Debug, Clone, Default)]
pub struct TcpConfig {
    /// Address dialed when the peer's own address refuses
    pub fallback_address: Option<String>,
}

/// TCP connector; peer ids are `host:port`
pub struct TcpConnector {
    config: TcpConfig,
}

impl TcpConnector {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }

    async fn dial(address: &str) -> io::Result<BoxedStream> {
        debug!("[TCP] Connecting to {}", address);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpTransportStream::new(stream)))
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect_primary(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        Self::dial(peer.as_str()).await
    }

    async fn connect_fallback(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        match self.config.fallback_address {
            Some(ref address) => Self::dial(address).await,
            None => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("no fallback address configured for {}", peer),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
