//! RFCOMM transport implementation for Bluetooth serial-profile peers

use crate::transport::traits::{BoxedStream, TransportConnector, TransportStream};
use async_trait::async_trait;
use bluer::rfcomm::{
    Profile, ProfileHandle, ReqError, Role, SocketAddr as RfcommAddr, Stream as RfcommStream,
};
use bluer::{Adapter, Address, Session, Uuid};
use futures::StreamExt;
use spp_shared::{link, PeerId};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, info};

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
}

impl RfcommTransportStream {
    /// Create a new RFCOMM transport stream
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
        }
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
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
impl TransportStream for RfcommTransportStream {
    async fn close(&mut self) -> io::Result<()> {
        debug!("[BT] Closing RFCOMM socket to {}", self.peer_addr);
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }
}

/// Configuration for RFCOMM connector
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Service class resolved through the peer's service records
    pub service_uuid: Uuid,
    /// Channel dialed directly when the service lookup fails
    pub fallback_channel: u8,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            service_uuid: Uuid::from_u128(link::SPP_SERVICE_UUID),
            fallback_channel: link::DEFAULT_FALLBACK_CHANNEL,
        }
    }
}

/// Parse a peer identity as a Bluetooth address
pub fn parse_address(peer: &PeerId) -> io::Result<Address> {
    peer.as_str().parse::<Address>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' is not a Bluetooth address: {}", peer, e),
        )
    })
}

/// RFCOMM connector for serial-profile peers
pub struct RfcommConnector {
    session: Session,
    adapter: Adapter,
    config: RfcommConfig,
}

impl RfcommConnector {
    /// Create a connector bound to an already opened adapter
    pub fn new(session: Session, adapter: Adapter, config: RfcommConfig) -> Self {
        Self {
            session,
            adapter,
            config,
        }
    }

    /// Register a client profile for the service class so BlueZ hands us
    /// the socket once it has resolved the channel from the service record
    async fn register_client_profile(&self) -> io::Result<ProfileHandle> {
        let profile = Profile {
            uuid: self.config.service_uuid,
            role: Some(Role::Client),
            require_authentication: Some(false),
            require_authorization: Some(false),
            auto_connect: Some(false),
            ..Default::default()
        };
        self.session
            .register_profile(profile)
            .await
            .map_err(io::Error::other)
    }
}

/// Wait for BlueZ to deliver the profile connection for `addr`
async fn accept_profile_connection(
    profile: &mut ProfileHandle,
    addr: Address,
) -> io::Result<RfcommStream> {
    while let Some(request) = profile.next().await {
        if request.device() == addr {
            return request.accept().map_err(io::Error::other);
        }
        debug!("[BT] Rejecting profile connection from {}", request.device());
        request.reject(ReqError::Rejected);
    }
    Err(io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "profile unregistered before connection arrived",
    ))
}

#[async_trait]
impl TransportConnector for RfcommConnector {
    async fn connect_primary(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        let addr = parse_address(peer)?;
        let device = self.adapter.device(addr).map_err(io::Error::other)?;
        let mut profile = self.register_client_profile().await?;

        info!(
            "[BT] Connecting to {} via service {}",
            addr, self.config.service_uuid
        );

        let connect = device.connect_profile(&self.config.service_uuid);
        let accept = accept_profile_connection(&mut profile, addr);
        tokio::pin!(connect, accept);

        let stream = tokio::select! {
            stream = &mut accept => stream?,
            result = &mut connect => {
                result.map_err(io::Error::other)?;
                accept.await?
            }
        };

        info!("[BT] Connected to {}", addr);
        Ok(Box::new(RfcommTransportStream::new(stream, addr)))
    }

    async fn connect_fallback(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        let addr = parse_address(peer)?;
        let socket_addr = RfcommAddr::new(addr, self.config.fallback_channel);
        info!(
            "[BT] Connecting to {} channel {}",
            addr, self.config.fallback_channel
        );

        let stream = RfcommStream::connect(socket_addr).await?;

        info!("[BT] Connected to {}", addr);
        Ok(Box::new(RfcommTransportStream::new(stream, addr)))
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}
