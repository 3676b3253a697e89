use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use greeting_service::config::Config;
use greeting_service::{
    Coordinator, CoordinatorOptions, LifecycleState, Registry, RegistryError, ServiceIdentity,
    ServiceRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Register(String),
    Deregister(String),
}

/// Registry fake that records every call. When a probe address is set, each
/// deregistration also checks whether that HTTP listener still answers `/health`.
#[derive(Default)]
pub struct RecordingRegistry {
    calls: Mutex<Vec<RegistryCall>>,
    fail: bool,
    probe: Mutex<Option<SocketAddr>>,
    reachable_at_deregister: Mutex<Vec<bool>>,
}

impl RecordingRegistry {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn register_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RegistryCall::Register(_)))
            .count()
    }

    pub fn deregister_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, RegistryCall::Deregister(_)))
            .count()
    }

    pub fn probe_on_deregister(&self, http_addr: SocketAddr) {
        *self.probe.lock().unwrap() = Some(http_addr);
    }

    pub fn reachable_at_deregister(&self) -> Vec<bool> {
        self.reachable_at_deregister.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), RegistryError> {
        if self.fail {
            Err(RegistryError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "registry down".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Registry for RecordingRegistry {
    async fn register(&self, record: &ServiceRecord) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::Register(record.id.clone()));
        self.outcome()
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        self.calls
            .lock()
            .unwrap()
            .push(RegistryCall::Deregister(service_id.to_string()));

        let probe = *self.probe.lock().unwrap();
        if let Some(addr) = probe {
            let reachable = health_ok(addr).await;
            self.reachable_at_deregister.lock().unwrap().push(reachable);
        }

        self.outcome()
    }
}

pub fn test_config(registration_delay: Duration) -> Config {
    let mut config = Config::default_test_config();
    config.registration_delay_ms = registration_delay.as_millis() as u64;
    config
}

pub fn coordinator_with(config: &Config, registry: Arc<RecordingRegistry>) -> Arc<Coordinator> {
    let registry: Arc<dyn Registry> = registry;
    Arc::new(Coordinator::new(
        ServiceIdentity::from_config(config),
        Some(registry),
        CoordinatorOptions::from_config(config),
    ))
}

pub async fn wait_for_state<F>(coordinator: &Coordinator, predicate: F)
where
    F: FnMut(&LifecycleState) -> bool,
{
    let mut state = coordinator.subscribe();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(predicate))
        .await
        .expect("timed out waiting for lifecycle state")
        .expect("state channel closed");
}

pub async fn health_ok(addr: SocketAddr) -> bool {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    match client.get(format!("http://{addr}/health")).send().await {
        Ok(response) => response.status().is_success(),
        Err(_) => false,
    }
}
