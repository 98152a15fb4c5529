//! In-memory transport for testing.
//!
//! [`MemoryConnector`] hands out [`MemoryStream`]s backed by tokio's
//! [`DuplexStream`]. The far end of every socket it opens is delivered as
//! a [`RemotePeer`], which can echo, push bytes, hang up, or inject read
//! and write failures into the local side.
//!
//! # Example
//!
//! ```
//! use spp_link::transport::memory::{ConnectPlan, MemoryConnector};
//!
//! // Primary connect is refused, the fallback path succeeds
//! let (connector, mut remotes) = MemoryConnector::new(ConnectPlan::FALLBACK_ONLY);
//! # let _ = (&connector, &mut remotes);
//! ```

use crate::transport::traits::{BoxedStream, TransportConnector, TransportStream};
use async_trait::async_trait;
use spp_shared::PeerId;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, oneshot};

const BUFFER_SIZE: usize = 64 * 1024;

/// How one connect strategy behaves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Open a socket
    Accept,
    /// Fail immediately with `ConnectionRefused`
    Refuse,
    /// Never complete
    Stall,
    /// Open a socket after waiting
    Delay(Duration),
}

/// Behaviour of both strategies for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPlan {
    pub primary: ConnectStep,
    pub fallback: ConnectStep,
}

impl ConnectPlan {
    pub const ACCEPT: Self = Self {
        primary: ConnectStep::Accept,
        fallback: ConnectStep::Refuse,
    };
    pub const FALLBACK_ONLY: Self = Self {
        primary: ConnectStep::Refuse,
        fallback: ConnectStep::Accept,
    };
    pub const REFUSE: Self = Self {
        primary: ConnectStep::Refuse,
        fallback: ConnectStep::Refuse,
    };
    pub const STALL: Self = Self {
        primary: ConnectStep::Stall,
        fallback: ConnectStep::Stall,
    };
}

/// Local end of an in-memory socket
pub struct MemoryStream {
    inner: DuplexStream,
    read_fault: Option<oneshot::Receiver<io::Error>>,
    fail_writes: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

/// Far end of an in-memory socket
pub struct RemotePeer {
    pub peer: PeerId,
    pub stream: DuplexStream,
    read_fault: Option<oneshot::Sender<io::Error>>,
    fail_writes: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MemoryStream {
    /// Create a connected local/remote pair
    pub fn pair(peer: PeerId) -> (MemoryStream, RemotePeer) {
        let (local, remote) = duplex(BUFFER_SIZE);
        let (fault_tx, fault_rx) = oneshot::channel();
        let fail_writes = Arc::new(AtomicBool::new(false));
        let fail_close = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));

        let stream = MemoryStream {
            inner: local,
            read_fault: Some(fault_rx),
            fail_writes: fail_writes.clone(),
            fail_close: fail_close.clone(),
            closed: closed.clone(),
        };
        let remote = RemotePeer {
            peer,
            stream: remote,
            read_fault: Some(fault_tx),
            fail_writes,
            fail_close,
            closed,
        };
        (stream, remote)
    }
}

impl RemotePeer {
    /// Make the local side's next read fail with `err`
    pub fn inject_read_error(&mut self, err: io::Error) {
        if let Some(tx) = self.read_fault.take() {
            let _ = tx.send(err);
        }
    }

    /// Make every further local write fail with `BrokenPipe`
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make the local side's `close` fail with `Other`
    pub fn fail_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    /// Whether the local side closed the socket gracefully
    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Echo everything back until the local side hangs up
    pub async fn echo(mut self) -> io::Result<u64> {
        let (mut reader, mut writer) = tokio::io::split(&mut self.stream);
        tokio::io::copy(&mut reader, &mut writer).await
    }
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(fault) = self.read_fault.as_mut() {
            if let Poll::Ready(result) = Pin::new(fault).poll(cx) {
                self.read_fault = None;
                if let Ok(err) = result {
                    return Poll::Ready(Err(err));
                }
            }
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
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
impl TransportStream for MemoryStream {
    async fn close(&mut self) -> io::Result<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("injected close failure"));
        }
        self.closed.store(true, Ordering::SeqCst);
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await
    }
}

/// Connector whose strategies follow a per-peer [`ConnectPlan`]
pub struct MemoryConnector {
    default_plan: ConnectPlan,
    plans: Mutex<HashMap<PeerId, ConnectPlan>>,
    remote_tx: mpsc::UnboundedSender<RemotePeer>,
    primary_calls: AtomicUsize,
    fallback_calls: AtomicUsize,
}

impl MemoryConnector {
    /// Create a connector and the stream of far ends it opens
    pub fn new(default_plan: ConnectPlan) -> (Self, mpsc::UnboundedReceiver<RemotePeer>) {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let connector = Self {
            default_plan,
            plans: Mutex::new(HashMap::new()),
            remote_tx,
            primary_calls: AtomicUsize::new(0),
            fallback_calls: AtomicUsize::new(0),
        };
        (connector, remote_rx)
    }

    /// Override the plan for one peer
    pub fn set_plan(&self, peer: impl Into<PeerId>, plan: ConnectPlan) {
        if let Ok(mut plans) = self.plans.lock() {
            plans.insert(peer.into(), plan);
        }
    }

    pub fn primary_calls(&self) -> usize {
        self.primary_calls.load(Ordering::SeqCst)
    }

    pub fn fallback_calls(&self) -> usize {
        self.fallback_calls.load(Ordering::SeqCst)
    }

    fn plan_for(&self, peer: &PeerId) -> ConnectPlan {
        self.plans
            .lock()
            .ok()
            .and_then(|plans| plans.get(peer).copied())
            .unwrap_or(self.default_plan)
    }

    fn open(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        let (stream, remote) = MemoryStream::pair(peer.clone());
        self.remote_tx
            .send(remote)
            .map_err(|_| io::Error::new(io::ErrorKind::NotConnected, "no remote side"))?;
        Ok(Box::new(stream))
    }

    async fn run_step(&self, peer: &PeerId, step: ConnectStep) -> io::Result<BoxedStream> {
        match step {
            ConnectStep::Accept => self.open(peer),
            ConnectStep::Refuse => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} refused the connection", peer),
            )),
            ConnectStep::Stall => std::future::pending().await,
            ConnectStep::Delay(wait) => {
                tokio::time::sleep(wait).await;
                self.open(peer)
            }
        }
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect_primary(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        self.primary_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.plan_for(peer).primary;
        self.run_step(peer, step).await
    }

    async fn connect_fallback(&self, peer: &PeerId) -> io::Result<BoxedStream> {
        self.fallback_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.plan_for(peer).fallback;
        self.run_step(peer, step).await
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn memory_stream_roundtrip() {
        let (mut local, mut remote) = MemoryStream::pair(PeerId::from("peer"));

        local.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        remote.stream.write_all(b"pong").await.unwrap();
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn injected_read_error_wakes_pending_read() {
        let (mut local, mut remote) = MemoryStream::pair(PeerId::from("peer"));

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            local.read(&mut buf).await
        });
        tokio::task::yield_now().await;
        remote.inject_read_error(io::ErrorKind::ConnectionReset.into());

        let err = reader.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn write_failure_and_close_are_observable() {
        let (mut local, remote) = MemoryStream::pair(PeerId::from("peer"));

        remote.fail_writes();
        let err = local.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        assert!(!remote.was_closed());
        local.close().await.unwrap();
        assert!(remote.was_closed());
    }

    #[tokio::test]
    async fn injected_close_failure() {
        let (mut local, remote) = MemoryStream::pair(PeerId::from("peer"));

        remote.fail_close();
        assert!(local.close().await.is_err());
        assert!(!remote.was_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_step_opens_after_wait() {
        let (connector, mut remotes) = MemoryConnector::new(ConnectPlan {
            primary: ConnectStep::Delay(Duration::from_millis(200)),
            fallback: ConnectStep::Refuse,
        });

        let started = tokio::time::Instant::now();
        assert!(connector.connect_primary(&PeerId::from("slow")).await.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(remotes.recv().await.unwrap().peer, PeerId::from("slow"));
    }

    #[tokio::test]
    async fn connector_follows_peer_plans() {
        let (connector, mut remotes) = MemoryConnector::new(ConnectPlan::REFUSE);
        connector.set_plan("good", ConnectPlan::FALLBACK_ONLY);

        assert!(connector.connect_primary(&PeerId::from("good")).await.is_err());
        assert!(connector.connect_fallback(&PeerId::from("good")).await.is_ok());
        assert!(connector.connect_fallback(&PeerId::from("bad")).await.is_err());

        assert_eq!(remotes.recv().await.unwrap().peer, PeerId::from("good"));
        assert_eq!(connector.primary_calls(), 1);
        assert_eq!(connector.fallback_calls(), 2);
    }
}
