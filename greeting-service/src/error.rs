use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Fatal coordinator outcomes; `main` turns these into a non-zero exit.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{listener} listener failed to bind {addr}: {source}")]
    Bind {
        listener: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("{listener} listener stopped unexpectedly")]
    ListenerDied { listener: &'static str },
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("{listener} listener task panicked")]
    Panicked { listener: &'static str },

    #[error("{listener} listener did not stop within {timeout:?}")]
    StopTimeout {
        listener: &'static str,
        timeout: Duration,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("registry returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}
