//! Connect worker: runs the transport handshake off the caller's path

use super::manager::Shared;
use crate::transport::{BoxedStream, TransportConnector};
use spp_shared::{LinkError, PeerId};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Spawn the worker for one connect attempt
pub(crate) fn spawn(shared: Arc<Shared>, attempt_id: u64, peer: PeerId, token: CancellationToken) {
    tokio::spawn(run(shared, attempt_id, peer, token));
}

async fn run(shared: Arc<Shared>, attempt_id: u64, peer: PeerId, token: CancellationToken) {
    // Discovery slows the handshake down on most stacks
    shared.discovery.cancel_discovery();

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("[CONNECT] Attempt {} to {} cancelled", attempt_id, peer);
            return;
        }
        outcome = establish(
            shared.connector.as_ref(),
            &peer,
            shared.config.connect_timeout,
        ) => outcome,
    };

    match outcome {
        Ok(stream) => {
            if let Some(mut stream) = shared.promote(attempt_id, &peer, stream).await {
                debug!(
                    "[CONNECT] Attempt {} to {} superseded, releasing socket",
                    attempt_id, peer
                );
                if let Err(e) = stream.close().await {
                    debug!("[CONNECT] Close of superseded socket failed: {}", e);
                }
            }
        }
        Err(cause) => shared.attempt_failed(attempt_id, &peer, cause).await,
    }
}

/// Try the primary strategy, then the fallback once
pub(crate) async fn establish(
    connector: &dyn TransportConnector,
    peer: &PeerId,
    limit: Duration,
) -> Result<BoxedStream, LinkError> {
    let primary = match bounded(limit, connector.connect_primary(peer)).await {
        Ok(stream) => return Ok(stream),
        Err(e) => e,
    };

    warn!(
        "[CONNECT] {} connect to {} failed: {}; trying fallback",
        connector.name(),
        peer,
        primary
    );

    match bounded(limit, connector.connect_fallback(peer)).await {
        Ok(stream) => Ok(stream),
        Err(fallback) => {
            error!("[CONNECT] Couldn't establish a connection to {}", peer);
            Err(LinkError::connect_failed(primary, fallback))
        }
    }
}

async fn bounded<F>(limit: Duration, connect: F) -> io::Result<BoxedStream>
where
    F: Future<Output = io::Result<BoxedStream>>,
{
    match tokio::time::timeout(limit, connect).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connect timed out after {:?}", limit),
        )),
    }
}
