//! Plain HTTP listener: health check plus JSON mirrors of the gRPC operations.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::error::ListenerError;
use crate::greeting::{self, GreetingInfo, Transport};
use crate::identity::ServiceIdentity;
use crate::listener::ListenerHandle;
use crate::metrics::track_metrics;

pub const LISTENER_NAME: &str = "http";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
}

#[derive(Debug, Serialize)]
pub struct HelloResponse {
    pub message: String,
    pub timestamp: String,
    pub service: String,
}

/// Healthy as long as the HTTP listener is serving; does not look at the gRPC side.
async fn health(State(identity): State<Arc<ServiceIdentity>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: identity.name.clone(),
    })
}

/// A repeated `name` parameter is accepted; the first value wins.
async fn hello(
    State(identity): State<Arc<ServiceIdentity>>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<HelloResponse> {
    let name = params
        .iter()
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.as_str());
    let greeting = greeting::greet(name);

    Json(HelloResponse {
        message: greeting.message,
        timestamp: greeting.timestamp,
        service: identity.name.clone(),
    })
}

async fn greeting_info() -> Json<GreetingInfo> {
    Json(greeting::info(Transport::Http))
}

/// Build the HTTP routes. `/metrics` and the request metrics middleware are only
/// mounted when a Prometheus recorder was installed.
pub fn router(identity: Arc<ServiceIdentity>, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/api/hello", get(hello))
        .route("/api/greeting/info", get(greeting_info))
        .with_state(identity);

    match metrics {
        Some(handle) => router
            .route(
                "/metrics",
                get(move || std::future::ready(handle.render())),
            )
            .layer(axum::middleware::from_fn(track_metrics)),
        None => router,
    }
}

/// Bind `addr` and start serving `router`. Bind errors are returned before anything is spawned.
pub async fn bind(
    addr: SocketAddr,
    router: Router,
    failures: mpsc::Sender<&'static str>,
) -> Result<ListenerHandle, std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let serve = async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await?;
        Ok::<(), ListenerError>(())
    };

    Ok(ListenerHandle::spawn(
        LISTENER_NAME,
        local_addr,
        stop_tx,
        failures,
        serve,
    ))
}
