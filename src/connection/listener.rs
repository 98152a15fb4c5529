//! Event listener contract and its channel-backed implementation

use bytes::Bytes;
use spp_shared::{LinkError, PeerId};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives lifecycle, data and error notifications from the manager
///
/// Callbacks run on the worker tasks while the manager's state lock is
/// held, so they must return quickly and must not block.
pub trait EventListener: Send + Sync + 'static {
    fn connection_success(&self, peer: &PeerId);

    fn connection_failed(&self, peer: &PeerId, cause: &LinkError);

    fn connection_lost(&self, peer: &PeerId, cause: &LinkError);

    /// `data` holds exactly the bytes returned by one read
    fn data_received(&self, peer: &PeerId, data: Bytes);

    /// Non-fatal failures such as write or close errors
    fn on_error(&self, peer: &PeerId, cause: &LinkError);
}

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Socket handed to a new session
    Connected { peer: PeerId },
    /// Both connect strategies failed
    ConnectionFailed { peer: PeerId, cause: LinkError },
    /// Session's stream failed while nobody asked it to stop
    ConnectionLost { peer: PeerId, cause: LinkError },
    /// Bytes read from the peer
    DataReceived { peer: PeerId, data: Bytes },
    /// Non-fatal error
    Error { peer: PeerId, cause: LinkError },
}

impl ConnectionEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            ConnectionEvent::Connected { peer }
            | ConnectionEvent::ConnectionFailed { peer, .. }
            | ConnectionEvent::ConnectionLost { peer, .. }
            | ConnectionEvent::DataReceived { peer, .. }
            | ConnectionEvent::Error { peer, .. } => peer,
        }
    }
}

/// Listener that forwards every callback as a [`ConnectionEvent`]
pub struct ChannelListener {
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ChannelListener {
    pub fn new(event_tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { event_tx }
    }

    fn emit(&self, event: ConnectionEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.event_tx.send(event);
    }
}

impl EventListener for ChannelListener {
    fn connection_success(&self, peer: &PeerId) {
        self.emit(ConnectionEvent::Connected { peer: peer.clone() });
    }

    fn connection_failed(&self, peer: &PeerId, cause: &LinkError) {
        self.emit(ConnectionEvent::ConnectionFailed {
            peer: peer.clone(),
            cause: cause.clone(),
        });
    }

    fn connection_lost(&self, peer: &PeerId, cause: &LinkError) {
        self.emit(ConnectionEvent::ConnectionLost {
            peer: peer.clone(),
            cause: cause.clone(),
        });
    }

    fn data_received(&self, peer: &PeerId, data: Bytes) {
        self.emit(ConnectionEvent::DataReceived {
            peer: peer.clone(),
            data,
        });
    }

    fn on_error(&self, peer: &PeerId, cause: &LinkError) {
        self.emit(ConnectionEvent::Error {
            peer: peer.clone(),
            cause: cause.clone(),
        });
    }
}

/// Create a listener and the receiving end of its event stream
pub fn event_channel() -> (Arc<ChannelListener>, mpsc::UnboundedReceiver<ConnectionEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelListener::new(event_tx)), event_rx)
}
