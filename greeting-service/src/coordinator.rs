//! Lifecycle coordinator: listener startup, deferred registration, and ordered shutdown.
//!
//! ```text
//! Init -> ListenersStarting -> Running -> Registering -> Registered | RegistrationFailed
//!                  |                                              |
//!            bind failure                                 signal / request / listener died
//!                  v                                              v
//!               Stopped  <-  Deregistered  <-  ShuttingDown  <----+
//! ```
//!
//! Registration never happens before both listeners are bound, and deregistration
//! is always attempted before either listener is released.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::LifecycleError;
use crate::identity::ServiceIdentity;
use crate::listener::ListenerHandle;
use crate::metrics;
use crate::registry::{HealthCheck, Registry, ServiceRecord};
use crate::{grpc, http};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    ListenersStarting,
    Running,
    Registering,
    Registered,
    /// Not terminal: the service keeps serving unregistered.
    RegistrationFailed,
    ShuttingDown,
    Deregistered,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Init => "init",
            LifecycleState::ListenersStarting => "listeners_starting",
            LifecycleState::Running => "running",
            LifecycleState::Registering => "registering",
            LifecycleState::Registered => "registered",
            LifecycleState::RegistrationFailed => "registration_failed",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Deregistered => "deregistered",
            LifecycleState::Stopped => "stopped",
        }
    }

    /// True while both listeners accept traffic.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            LifecycleState::Running
                | LifecycleState::Registering
                | LifecycleState::Registered
                | LifecycleState::RegistrationFailed
        )
    }
}

#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub rpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    /// Grace period between both listeners binding and registering, so the
    /// health endpoint is up before the registry starts polling it.
    pub registration_delay: Duration,
    /// Upper bound on each listener's graceful stop.
    pub stop_timeout: Duration,
    pub health_check: HealthCheck,
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rpc_addr: config.rpc_addr(),
            http_addr: config.http_addr(),
            registration_delay: config.registration_delay(),
            stop_timeout: config.shutdown_timeout(),
            health_check: config.health_check(),
        }
    }
}

struct Listeners {
    rpc: ListenerHandle,
    http: ListenerHandle,
}

/// Owns all mutable process state: listener handles, the registration timer and
/// the lifecycle state. Construct once in `main` and share it behind an `Arc`.
pub struct Coordinator {
    identity: Arc<ServiceIdentity>,
    record: ServiceRecord,
    registry: Option<Arc<dyn Registry>>,
    options: CoordinatorOptions,
    metrics: Option<PrometheusHandle>,
    state_tx: watch::Sender<LifecycleState>,
    shutdown_token: CancellationToken,
    registration_cancel: CancellationToken,
    shutdown_started: AtomicBool,
    listeners: Mutex<Option<Listeners>>,
    registration_task: Mutex<Option<JoinHandle<()>>>,
    failures_tx: mpsc::Sender<&'static str>,
    failures_rx: Mutex<Option<mpsc::Receiver<&'static str>>>,
}

impl Coordinator {
    /// `registry: None` disables registration and deregistration.
    pub fn new(
        identity: ServiceIdentity,
        registry: Option<Arc<dyn Registry>>,
        options: CoordinatorOptions,
    ) -> Self {
        let record = ServiceRecord::new(&identity, &options.health_check);
        let (state_tx, _) = watch::channel(LifecycleState::Init);
        let (failures_tx, failures_rx) = mpsc::channel(2);

        Self {
            identity: Arc::new(identity),
            record,
            registry,
            options,
            metrics: None,
            state_tx,
            shutdown_token: CancellationToken::new(),
            registration_cancel: CancellationToken::new(),
            shutdown_started: AtomicBool::new(false),
            listeners: Mutex::new(None),
            registration_task: Mutex::new(None),
            failures_tx,
            failures_rx: Mutex::new(Some(failures_rx)),
        }
    }

    /// Serve `/metrics` from this Prometheus recorder on the HTTP listener.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    /// Watch every state transition.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Actual `(rpc, http)` bound addresses, once started and until stopped.
    pub async fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.listeners
            .lock()
            .await
            .as_ref()
            .map(|l| (l.rpc.local_addr(), l.http.local_addr()))
    }

    /// Make [`run`](Coordinator::run) proceed to shutdown as if a signal arrived.
    pub fn request_shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Start, wait for a termination trigger, then shut down.
    ///
    /// Returns an error if a listener failed to bind (nothing is registered in
    /// that case) or if a listener died while running.
    pub async fn run<F>(self: Arc<Self>, signal: F) -> Result<(), LifecycleError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        let mut failures = self.failures_rx.lock().await.take();
        let died = tokio::select! {
            _ = signal => {
                info!("termination signal received, shutting down");
                None
            }
            _ = self.shutdown_token.cancelled() => {
                info!("shutdown requested");
                None
            }
            Some(listener) = next_failure(&mut failures) => {
                error!(listener, "listener died, shutting down");
                Some(listener)
            }
        };

        self.shutdown().await;

        match died {
            Some(listener) => Err(LifecycleError::ListenerDied { listener }),
            None => Ok(()),
        }
    }

    /// Bind both listeners concurrently and, once both are up, schedule registration.
    /// On any bind failure the listener that did bind is released again.
    pub async fn start(self: &Arc<Self>) -> Result<(), LifecycleError> {
        self.transition(LifecycleState::ListenersStarting);

        let router = http::router(self.identity.clone(), self.metrics.clone());
        let (rpc_result, http_result) = tokio::join!(
            grpc::bind(self.options.rpc_addr, self.failures_tx.clone()),
            http::bind(self.options.http_addr, router, self.failures_tx.clone()),
        );

        let listeners = match (rpc_result, http_result) {
            (Ok(rpc), Ok(http)) => Listeners { rpc, http },
            (Err(rpc_err), http_result) => {
                let err = bind_error(grpc::LISTENER_NAME, self.options.rpc_addr, rpc_err);
                match http_result {
                    Ok(handle) => self.release_after_failed_start(handle).await,
                    Err(e) => {
                        error!(
                            listener = http::LISTENER_NAME,
                            addr = %self.options.http_addr,
                            error = %e,
                            "listener failed to bind"
                        );
                    }
                }
                self.abort_startup();
                return Err(err);
            }
            (Ok(rpc), Err(http_err)) => {
                let err = bind_error(http::LISTENER_NAME, self.options.http_addr, http_err);
                self.release_after_failed_start(rpc).await;
                self.abort_startup();
                return Err(err);
            }
        };

        info!(
            rpc_addr = %listeners.rpc.local_addr(),
            http_addr = %listeners.http.local_addr(),
            service_id = %self.identity.instance_id,
            "both listeners bound"
        );
        *self.listeners.lock().await = Some(listeners);
        self.transition(LifecycleState::Running);

        self.schedule_registration().await;
        Ok(())
    }

    /// Deregister, then stop both listeners. Safe to call more than once: later
    /// callers wait for the first shutdown to finish and do nothing else.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress");
            let mut state = self.state_tx.subscribe();
            drop(state.wait_for(|s| *s == LifecycleState::Stopped).await);
            return;
        }

        let started = Instant::now();
        self.shutdown_token.cancel();

        // A pending timer never fires; a registration already in flight finishes
        // first so it cannot land after the deregistration.
        self.registration_cancel.cancel();
        let registration = self.registration_task.lock().await.take();
        if let Some(task) = registration {
            if let Err(e) = task.await {
                warn!(error = %e, "registration task did not complete");
            }
        }

        self.transition(LifecycleState::ShuttingDown);

        if let Some(registry) = &self.registry {
            let service_id = &self.identity.instance_id;
            match registry.deregister(service_id).await {
                Ok(()) => {
                    metrics::emit_deregistration_result("success");
                    info!(service_id = %service_id, "deregistered from service registry");
                }
                Err(e) => {
                    metrics::emit_deregistration_result("failure");
                    error!(service_id = %service_id, error = %e, "failed to deregister from service registry");
                }
            }
        }
        self.transition(LifecycleState::Deregistered);

        let listeners = self.listeners.lock().await.take();
        let mut clean = true;
        if let Some(Listeners { rpc, http }) = listeners {
            let timeout = self.options.stop_timeout;
            let (rpc_result, http_result) = tokio::join!(rpc.stop(timeout), http.stop(timeout));
            for e in [rpc_result, http_result].into_iter().filter_map(Result::err) {
                warn!(error = %e, "listener did not stop cleanly");
                clean = false;
            }
        }

        self.transition(LifecycleState::Stopped);

        let elapsed = started.elapsed();
        metrics::emit_shutdown_duration(elapsed.as_secs_f64(), clean);
        info!(
            clean,
            total_duration_secs = elapsed.as_secs_f64(),
            "shutdown complete"
        );
    }

    async fn schedule_registration(self: &Arc<Self>) {
        let Some(registry) = self.registry.clone() else {
            info!("service registry disabled, not registering");
            return;
        };

        let delay = self.options.registration_delay;
        let cancel = self.registration_cancel.clone();
        let coordinator = Arc::clone(self);

        let mut slot = self.registration_task.lock().await;
        *slot = Some(tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("registration cancelled before it fired");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            coordinator.register(registry.as_ref()).await;
        }));

        debug!(delay_ms = delay.as_millis() as u64, "registration scheduled");
    }

    async fn register(&self, registry: &dyn Registry) {
        self.transition(LifecycleState::Registering);

        match registry.register(&self.record).await {
            Ok(()) => {
                metrics::emit_registration_result("success");
                info!(service_id = %self.record.id, "registered with service registry");
                self.transition(LifecycleState::Registered);
            }
            Err(e) => {
                metrics::emit_registration_result("failure");
                error!(service_id = %self.record.id, error = %e, "failed to register with service registry");
                self.transition(LifecycleState::RegistrationFailed);
            }
        }
    }

    async fn release_after_failed_start(&self, handle: ListenerHandle) {
        let name = handle.name();
        if let Err(e) = handle.stop(self.options.stop_timeout).await {
            warn!(listener = name, error = %e, "failed to release listener after startup failure");
        }
    }

    fn abort_startup(&self) {
        self.shutdown_started.store(true, Ordering::SeqCst);
        self.transition(LifecycleState::Stopped);
    }

    fn transition(&self, state: LifecycleState) {
        let previous = self.state_tx.send_replace(state);
        metrics::emit_state_transition(state.as_str());
        info!(
            from = previous.as_str(),
            state = state.as_str(),
            "lifecycle state changed"
        );
    }
}

fn bind_error(listener: &'static str, addr: SocketAddr, source: std::io::Error) -> LifecycleError {
    let err = LifecycleError::Bind {
        listener,
        addr,
        source,
    };
    error!(listener, addr = %addr, error = %err, "listener failed to bind");
    err
}

async fn next_failure(rx: &mut Option<mpsc::Receiver<&'static str>>) -> Option<&'static str> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
