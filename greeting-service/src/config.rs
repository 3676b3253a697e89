use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use envconfig::Envconfig;

use crate::registry::HealthCheck;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub bind_host: IpAddr,

    #[envconfig(from = "GRPC_PORT", default = "9006")]
    pub grpc_port: u16,

    #[envconfig(from = "HTTP_PORT", default = "9007")]
    pub http_port: u16,

    /// Hostname the registry should use to reach this instance.
    #[envconfig(from = "SERVICE_ADDRESS", default = "nodejs-service")]
    pub service_address: String,

    #[envconfig(from = "CONSUL_HOST", default = "consul")]
    pub consul_host: String,

    #[envconfig(from = "CONSUL_PORT", default = "8500")]
    pub consul_port: u16,

    #[envconfig(from = "REGISTRY_ENABLED", default = "true")]
    pub registry_enabled: bool,

    #[envconfig(from = "REGISTRY_TIMEOUT_MS", default = "5000")]
    pub registry_timeout_ms: u64,

    #[envconfig(from = "REGISTRATION_DELAY_MS", default = "5000")]
    pub registration_delay_ms: u64,

    #[envconfig(from = "SHUTDOWN_TIMEOUT_SECS", default = "10")]
    pub shutdown_timeout_secs: u64,

    #[envconfig(from = "HEALTH_CHECK_INTERVAL", default = "10s")]
    pub health_check_interval: String,

    #[envconfig(from = "HEALTH_CHECK_TIMEOUT", default = "5s")]
    pub health_check_timeout: String,

    #[envconfig(from = "DEREGISTER_CRITICAL_AFTER", default = "30s")]
    pub deregister_critical_after: String,
}

impl Config {
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.grpc_port)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.http_port)
    }

    pub fn registry_url(&self) -> String {
        format!("http://{}:{}", self.consul_host, self.consul_port)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }

    pub fn registration_delay(&self) -> Duration {
        Duration::from_millis(self.registration_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn health_check(&self) -> HealthCheck {
        HealthCheck {
            interval: self.health_check_interval.clone(),
            timeout: self.health_check_timeout.clone(),
            deregister_critical_after: self.deregister_critical_after.clone(),
        }
    }

    /// Loopback listeners on ephemeral ports, registry disabled and short timers.
    pub fn default_test_config() -> Self {
        Self {
            bind_host: IpAddr::from([127, 0, 0, 1]),
            grpc_port: 0,
            http_port: 0,
            service_address: "127.0.0.1".to_string(),
            consul_host: "127.0.0.1".to_string(),
            consul_port: 8500,
            registry_enabled: false,
            registry_timeout_ms: 1000,
            registration_delay_ms: 50,
            shutdown_timeout_secs: 5,
            health_check_interval: "10s".to_string(),
            health_check_timeout: "5s".to_string(),
            deregister_critical_after: "30s".to_string(),
        }
    }
}

/// Add variables from a `.env` file in the working directory (or a parent) to the
/// process environment. Variables already set win. A missing file is not an error.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
