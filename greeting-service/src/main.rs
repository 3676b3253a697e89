use std::process::ExitCode;
use std::sync::Arc;

use envconfig::Envconfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use greeting_service::config::{load_dotenv, Config};
use greeting_service::metrics::setup_metrics_recorder;
use greeting_service::signals::TerminationSignals;
use greeting_service::{ConsulRegistry, Coordinator, CoordinatorOptions, Registry, ServiceIdentity};

#[tokio::main]
async fn main() -> ExitCode {
    // Before tracing init so RUST_LOG can come from the file
    let dotenv = load_dotenv();

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(log_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    match dotenv {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "Loaded .env file"),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
    }

    let config = match Config::init_from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting nodejs-service");
    tracing::info!("gRPC address: {}", config.rpc_addr());
    tracing::info!("HTTP address: {}", config.http_addr());
    tracing::info!("Registry: {}", config.registry_url());

    // Installed before anything binds so an early signal is not missed
    let mut signals = match TerminationSignals::install() {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return ExitCode::FAILURE;
        }
    };

    let registry: Option<Arc<dyn Registry>> = if config.registry_enabled {
        match ConsulRegistry::new(&config.registry_url(), config.registry_timeout()) {
            Ok(consul) => {
                let registry: Arc<dyn Registry> = Arc::new(consul);
                Some(registry)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to build registry client");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let identity = ServiceIdentity::from_config(&config);
    tracing::info!(service_id = %identity.instance_id, "Service identity created");

    let mut coordinator =
        Coordinator::new(identity, registry, CoordinatorOptions::from_config(&config));
    match setup_metrics_recorder() {
        Ok(handle) => coordinator = coordinator.with_metrics(handle),
        Err(e) => tracing::warn!(error = %e, "Metrics recorder unavailable, /metrics disabled"),
    }

    let shutdown = async move {
        let signal = signals.recv().await;
        tracing::info!(signal, "Received termination signal");
    };

    match Arc::new(coordinator).run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Service terminated with error");
            ExitCode::FAILURE
        }
    }
}
