use chrono::Utc;

use crate::config::Config;
use crate::greeting::SERVICE_NAME;

/// Self-description announced to the registry. Created once at startup and
/// read-only afterwards, so it is shared behind an `Arc` without locking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub name: String,
    /// `{name}-{start time in ms}`, unique per process lifetime.
    pub instance_id: String,
    pub address: String,
    pub rpc_port: u16,
    pub http_port: u16,
}

impl ServiceIdentity {
    pub fn new(name: &str, address: &str, rpc_port: u16, http_port: u16) -> Self {
        Self {
            name: name.to_string(),
            instance_id: format!("{name}-{}", Utc::now().timestamp_millis()),
            address: address.to_string(),
            rpc_port,
            http_port,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            SERVICE_NAME,
            &config.service_address,
            config.grpc_port,
            config.http_port,
        )
    }

    pub fn health_url(&self) -> String {
        format!("http://{}:{}/health", self.address, self.http_port)
    }
}
