//! Ownership of a bound, serving network listener.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ListenerError;

/// Handle to a listener whose socket is already bound and whose serve loop runs
/// on its own task. Stopping consumes the handle, so it can only be released once.
pub struct ListenerHandle {
    name: &'static str,
    local_addr: SocketAddr,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ListenerError>>,
}

impl ListenerHandle {
    /// Spawn `serve`, which must return once `stop_rx` resolves. If it ends with
    /// an error instead, the listener's name is sent on `failures`.
    pub(crate) fn spawn<F>(
        name: &'static str,
        local_addr: SocketAddr,
        stop_tx: oneshot::Sender<()>,
        failures: mpsc::Sender<&'static str>,
        serve: F,
    ) -> Self
    where
        F: Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let result = serve.await;
            if let Err(e) = &result {
                error!(listener = name, error = %e, "listener stopped with error");
                if let Err(e) = failures.try_send(name) {
                    warn!(listener = name, error = %e, "listener failure not delivered");
                }
            }
            result
        });

        info!(listener = name, addr = %local_addr, "listener bound");

        Self {
            name,
            local_addr,
            stop_tx,
            task,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, let in-flight requests finish, and wait at most
    /// `timeout` for the serve task. Past the deadline the task is aborted.
    pub async fn stop(self, timeout: Duration) -> Result<(), ListenerError> {
        let Self {
            name,
            stop_tx,
            mut task,
            ..
        } = self;

        if stop_tx.send(()).is_err() {
            debug!(listener = name, "listener already exited");
        }

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(result)) => {
                info!(listener = name, "listener stopped");
                result
            }
            Ok(Err(_)) => Err(ListenerError::Panicked { listener: name }),
            Err(_) => {
                task.abort();
                Err(ListenerError::StopTimeout {
                    listener: name,
                    timeout,
                })
            }
        }
    }
}
