//! Connection manager: one serial-profile link at a time
//!
//! Every state transition and every worker start/stop happens while the
//! [`LinkRecord`] lock is held. Workers re-enter through the `Shared`
//! methods and are ignored once they are no longer the current attempt or
//! session.

use super::connect_worker;
use super::connected_worker::{self, SessionHandle};
use super::listener::EventListener;
use crate::transport::{BoxedStream, Discovery, TransportConnector};
use bytes::Bytes;
use spp_shared::{
    link, LinkError, LinkEvent, LinkState, LinkStateMachine, PeerId, TransitionResult,
};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How the session's read loop waits for inbound bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadStrategy {
    /// Await the stream directly; cancellation interrupts the pending read
    #[default]
    Blocking,
    /// Try a read without waiting and idle for `interval` when nothing is buffered
    Poll { interval: Duration },
}

impl ReadStrategy {
    pub fn poll_default() -> Self {
        ReadStrategy::Poll {
            interval: Duration::from_millis(link::DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Bytes requested from the stream per read
    pub read_buffer_size: usize,
    /// Read loop variant
    pub read_strategy: ReadStrategy,
    /// Limit for each connect strategy (primary and fallback separately)
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: link::DEFAULT_READ_BUFFER_SIZE,
            read_strategy: ReadStrategy::default(),
            connect_timeout: Duration::from_millis(link::DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Result of [`ConnectionManager::write`]
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// Bytes were written to the session's stream
    Written,
    /// No session was live; nothing happened
    NotConnected,
    /// The stream rejected the write; already reported through `on_error`
    Failed(LinkError),
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written)
    }
}

/// State, peer and entry time read under a single lock acquisition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub peer: Option<PeerId>,
    pub since_ms: u64,
}

/// In-flight connect attempt
struct ConnectAttempt {
    id: u64,
    peer: PeerId,
    token: CancellationToken,
}

/// The shared mutable record guarded by the manager's lock
///
/// `session` is `Some` exactly when the machine is `Connected`.
pub(crate) struct LinkRecord {
    fsm: LinkStateMachine,
    attempt: Option<ConnectAttempt>,
    session: Option<SessionHandle>,
}

impl LinkRecord {
    fn new() -> Self {
        Self {
            fsm: LinkStateMachine::new(),
            attempt: None,
            session: None,
        }
    }

    fn transition(&mut self, event: LinkEvent) {
        let from = self.fsm.state();
        match self.fsm.process_event(event) {
            TransitionResult::Success(to) if from != to => {
                info!("[LINK] {} -> {} ({:?})", from, to, event);
            }
            TransitionResult::Success(_) => {}
            TransitionResult::Invalid { from, event } => {
                warn!("[LINK] Ignoring {:?} while {}", event, from);
            }
        }
    }

    fn cancel_attempt(&mut self) {
        if let Some(attempt) = self.attempt.take() {
            debug!("[LINK] Cancelling attempt {} to {}", attempt.id, attempt.peer);
            attempt.token.cancel();
        }
    }

    fn cancel_session(&mut self) {
        if let Some(session) = self.session.take() {
            debug!("[LINK] Cancelling session {} with {}", session.id(), session.peer());
            session.cancel();
        }
    }

    fn is_current_attempt(&self, id: u64) -> bool {
        self.attempt
            .as_ref()
            .is_some_and(|attempt| attempt.id == id && !attempt.token.is_cancelled())
    }

    fn is_current_session(&self, session: &SessionHandle) -> bool {
        !session.is_cancelled()
            && self
                .session
                .as_ref()
                .is_some_and(|current| current.id() == session.id())
    }

    fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.fsm.state(),
            peer: self.session.as_ref().map(|s| s.peer().clone()),
            since_ms: self.fsm.entered_at_ms(),
        }
    }
}

/// State shared between the manager and its workers
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    pub(crate) connector: Arc<dyn TransportConnector>,
    pub(crate) discovery: Arc<dyn Discovery>,
    pub(crate) listener: Arc<dyn EventListener>,
    record: Mutex<LinkRecord>,
    /// Parent of every worker token; cancelled when the manager is dropped
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Promote a connected socket to the active session
    ///
    /// Hands the stream back when the attempt was superseded or cancelled
    /// so the caller can release it.
    pub(crate) async fn promote(
        self: &Arc<Self>,
        attempt_id: u64,
        peer: &PeerId,
        stream: BoxedStream,
    ) -> Option<BoxedStream> {
        let mut record = self.record.lock().await;
        if !record.is_current_attempt(attempt_id) {
            return Some(stream);
        }

        record.attempt.take();
        record.cancel_session();

        let session = connected_worker::spawn(self.clone(), self.next_id(), peer.clone(), stream);
        record.session = Some(session);
        record.transition(LinkEvent::SocketConnected);

        info!("[LINK] Connected to {} via {}", peer, self.connector.name());
        self.listener.connection_success(peer);
        None
    }

    /// Report a failed attempt, unless it was cancelled or superseded
    pub(crate) async fn attempt_failed(&self, attempt_id: u64, peer: &PeerId, cause: LinkError) {
        let mut record = self.record.lock().await;
        if !record.is_current_attempt(attempt_id) {
            debug!("[LINK] Dropping failure of stale attempt {}: {}", attempt_id, cause);
            return;
        }

        record.attempt.take();
        record.transition(LinkEvent::SocketFailed);
        self.listener.connection_failed(peer, &cause);
    }

    /// Forward inbound bytes; false once the session is no longer current
    pub(crate) async fn deliver(&self, session: &SessionHandle, data: Bytes) -> bool {
        let record = self.record.lock().await;
        if !record.is_current_session(session) {
            return false;
        }
        self.listener.data_received(session.peer(), data);
        true
    }

    /// Tear down a session whose stream failed, reporting the loss once
    pub(crate) async fn session_lost(&self, session: &SessionHandle, cause: LinkError) -> bool {
        let mut record = self.record.lock().await;
        if !record.is_current_session(session) {
            debug!(
                "[LINK] Session {} ended after cancellation: {}",
                session.id(),
                cause
            );
            return false;
        }

        record.session.take();
        record.transition(LinkEvent::StreamLost);
        self.listener.connection_lost(session.peer(), &cause);
        true
    }

    /// Report a failed write, unless the session was torn down meanwhile
    fn write_failed(&self, session: &SessionHandle, err: io::Error) -> WriteOutcome {
        if session.is_cancelled() {
            debug!(
                "[LINK] Write to {} failed after teardown: {}",
                session.peer(),
                err
            );
            return WriteOutcome::NotConnected;
        }

        let cause = LinkError::write(err);
        warn!("[LINK] Write to {} failed: {}", session.peer(), cause);
        self.report_error(session.peer(), &cause);
        WriteOutcome::Failed(cause)
    }

    pub(crate) fn report_error(&self, peer: &PeerId, cause: &LinkError) {
        self.listener.on_error(peer, cause);
    }
}

/// Manages a single connection to a serial-profile peer
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a manager; nothing is spawned until [`connect`](Self::connect)
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn TransportConnector>,
        discovery: Arc<dyn Discovery>,
        listener: Arc<dyn EventListener>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                discovery,
                listener,
                record: Mutex::new(LinkRecord::new()),
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Start connecting to `peer`; the outcome arrives through the listener
    ///
    /// Any attempt in flight is cancelled and any live session torn down
    /// before the new attempt starts.
    pub async fn connect(&self, peer: impl Into<PeerId>) {
        let peer = peer.into();
        let mut record = self.shared.record.lock().await;

        record.cancel_attempt();
        record.cancel_session();

        let id = self.shared.next_id();
        let token = self.shared.child_token();
        record.transition(LinkEvent::ConnectRequested);
        record.attempt = Some(ConnectAttempt {
            id,
            peer: peer.clone(),
            token: token.clone(),
        });

        info!("[LINK] Connecting to {} (attempt {})", peer, id);
        connect_worker::spawn(self.shared.clone(), id, peer, token);
    }

    /// Cancel any attempt, tear down any session; safe from any state
    pub async fn disconnect(&self) {
        let mut record = self.shared.record.lock().await;
        record.cancel_attempt();
        record.cancel_session();
        record.transition(LinkEvent::DisconnectRequested);
    }

    /// Write bytes to the live session
    ///
    /// The session is picked under the state lock; the write itself runs
    /// without it so a slow peer can't stall state transitions.
    pub async fn write(&self, data: &[u8]) -> WriteOutcome {
        let session = {
            let record = self.shared.record.lock().await;
            match (record.fsm.state(), record.session.as_ref()) {
                (LinkState::Connected, Some(session)) => session.clone(),
                _ => return WriteOutcome::NotConnected,
            }
        };

        match session.write(data).await {
            Ok(true) => WriteOutcome::Written,
            Ok(false) => WriteOutcome::NotConnected,
            Err(e) => self.shared.write_failed(&session, e),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == LinkState::Connected
    }

    /// Peer of the live session, if any
    pub async fn connected_peer(&self) -> Option<PeerId> {
        self.status().await.peer
    }

    pub async fn state(&self) -> LinkState {
        self.shared.record.lock().await.fsm.state()
    }

    pub async fn status(&self) -> LinkStatus {
        self.shared.record.lock().await.status()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Name of the transport behind this manager
    pub fn transport(&self) -> &'static str {
        self.shared.connector.name()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
