//! Connected worker: owns the live socket for one session
//!
//! The read loop runs on its own task and forwards every chunk it reads.
//! Writes come from callers through [`SessionHandle::write`] and are
//! serialized by the writer lock. When the loop exits, for any reason, it
//! reassembles the socket and closes it.

use super::manager::{ReadStrategy, Shared};
use crate::transport::BoxedStream;
use bytes::Bytes;
use futures::FutureExt;
use spp_shared::{LinkError, PeerId};
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a running session
///
/// Cloning is cheap; the manager keeps one clone in its record and
/// writers snapshot another before writing.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    id: u64,
    peer: PeerId,
    /// `None` once the read loop has released the socket
    writer: Arc<Mutex<Option<WriteHalf<BoxedStream>>>>,
    token: CancellationToken,
    connected_at: Instant,
}

impl SessionHandle {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Ask the read loop to stop; the socket is closed once it exits
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Write the whole buffer
    ///
    /// `Ok(false)` means the socket was already released, or the session
    /// was cancelled before the write finished. A cancelled write drops
    /// the writer lock so the read loop can reclaim and close the socket.
    pub(crate) async fn write(&self, data: &[u8]) -> io::Result<bool> {
        let write = async {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Ok(false);
            };
            writer.write_all(data).await?;
            writer.flush().await?;
            Ok::<_, io::Error>(true)
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Ok(false),
            written = write => written,
        }
    }

    /// Reassemble the socket and close it
    async fn release(&self, reader: ReadHalf<BoxedStream>) -> io::Result<()> {
        let writer = self.writer.lock().await.take();
        match writer {
            Some(writer) => {
                let mut stream = reader.unsplit(writer);
                stream.close().await
            }
            None => Ok(()),
        }
    }
}

/// Why the read loop stopped
enum Exit {
    Cancelled,
    Failed(LinkError),
}

/// Start a session on `stream` and return its handle
pub(crate) fn spawn(shared: Arc<Shared>, id: u64, peer: PeerId, stream: BoxedStream) -> SessionHandle {
    let (reader, writer) = tokio::io::split(stream);
    let session = SessionHandle {
        id,
        peer,
        writer: Arc::new(Mutex::new(Some(writer))),
        token: shared.child_token(),
        connected_at: Instant::now(),
    };

    tokio::spawn(run(shared, session.clone(), reader));
    session
}

async fn run(shared: Arc<Shared>, session: SessionHandle, mut reader: ReadHalf<BoxedStream>) {
    info!("[SESSION] Session {} with {} started", session.id, session.peer);

    let exit = read_loop(&shared, &session, &mut reader).await;

    match exit {
        Exit::Failed(cause) => {
            if shared.session_lost(&session, cause.clone()).await {
                warn!("[SESSION] Connection to {} lost: {}", session.peer, cause);
            }
        }
        Exit::Cancelled => {
            debug!("[SESSION] Session {} with {} cancelled", session.id, session.peer);
        }
    }

    if let Err(e) = session.release(reader).await {
        let cause = LinkError::close(e);
        warn!("[SESSION] Close of socket to {} failed: {}", session.peer, cause);
        shared.report_error(&session.peer, &cause);
    }

    info!(
        "[SESSION] Session {} with {} ended after {:?}",
        session.id,
        session.peer,
        session.connected_at.elapsed()
    );
}

async fn read_loop(
    shared: &Shared,
    session: &SessionHandle,
    reader: &mut ReadHalf<BoxedStream>,
) -> Exit {
    let mut buf = vec![0u8; shared.config.read_buffer_size.max(1)];

    loop {
        let read = match shared.config.read_strategy {
            ReadStrategy::Blocking => tokio::select! {
                biased;
                _ = session.token.cancelled() => return Exit::Cancelled,
                read = reader.read(&mut buf) => read,
            },
            ReadStrategy::Poll { interval } => {
                if session.token.is_cancelled() {
                    return Exit::Cancelled;
                }
                let ready = reader.read(&mut buf).now_or_never();
                match ready {
                    Some(read) => read,
                    None => {
                        // Nothing buffered; idle before polling again
                        tokio::select! {
                            _ = session.token.cancelled() => return Exit::Cancelled,
                            _ = tokio::time::sleep(interval) => continue,
                        }
                    }
                }
            }
        };

        match read {
            Ok(0) => return Exit::Failed(LinkError::Closed),
            Ok(n) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                if !shared.deliver(session, data).await {
                    return Exit::Cancelled;
                }
            }
            Err(e) => return Exit::Failed(LinkError::read(e)),
        }
    }
}
