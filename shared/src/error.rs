//! Error taxonomy for link failures
//!
//! I/O causes are held behind `Arc` so a single failure can be handed to
//! the event listener and still be logged by the worker that saw it.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by the connection core
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Connect failed (primary: {primary}; fallback: {fallback})")]
    ConnectFailed {
        primary: Arc<io::Error>,
        #[source]
        fallback: Arc<io::Error>,
    },

    #[error("Peer closed the connection")]
    Closed,

    #[error("Read error: {0}")]
    Read(#[source] Arc<io::Error>),

    #[error("Write error: {0}")]
    Write(#[source] Arc<io::Error>),

    #[error("Close error: {0}")]
    Close(#[source] Arc<io::Error>),
}

impl LinkError {
    pub fn connect_failed(primary: io::Error, fallback: io::Error) -> Self {
        Self::ConnectFailed {
            primary: Arc::new(primary),
            fallback: Arc::new(fallback),
        }
    }

    pub fn read(err: io::Error) -> Self {
        Self::Read(Arc::new(err))
    }

    pub fn write(err: io::Error) -> Self {
        Self::Write(Arc::new(err))
    }

    pub fn close(err: io::Error) -> Self {
        Self::Close(Arc::new(err))
    }
}
