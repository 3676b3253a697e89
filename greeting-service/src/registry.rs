//! Client for the service-discovery registry (Consul agent API).
//!
//! Calls are made once and never retried. The coordinator logs failures and
//! carries on, so an unavailable registry never stops the service from serving.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::Serialize;
use tracing::debug;

use crate::error::RegistryError;
use crate::identity::ServiceIdentity;

const SERVICE_TAGS: &[&str] = &["grpc", "nodejs", "greeting"];

/// Advertised health-check timings, in the registry's duration syntax (`10s`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub interval: String,
    pub timeout: String,
    pub deregister_critical_after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceCheck {
    #[serde(rename = "HTTP")]
    pub http: String,
    #[serde(rename = "Interval")]
    pub interval: String,
    #[serde(rename = "Timeout")]
    pub timeout: String,
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    pub deregister_critical_service_after: String,
}

/// Registration payload, serialized in the shape the Consul agent expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Meta")]
    pub meta: BTreeMap<String, String>,
    #[serde(rename = "Check")]
    pub check: ServiceCheck,
}

impl ServiceRecord {
    pub fn new(identity: &ServiceIdentity, health_check: &HealthCheck) -> Self {
        let meta = BTreeMap::from([
            ("rpc_port".to_string(), identity.rpc_port.to_string()),
            ("http_port".to_string(), identity.http_port.to_string()),
        ]);

        Self {
            id: identity.instance_id.clone(),
            name: identity.name.clone(),
            address: identity.address.clone(),
            port: identity.rpc_port,
            tags: SERVICE_TAGS.iter().map(|t| t.to_string()).collect(),
            meta,
            check: ServiceCheck {
                http: identity.health_url(),
                interval: health_check.interval.clone(),
                timeout: health_check.timeout.clone(),
                deregister_critical_service_after: health_check.deregister_critical_after.clone(),
            },
        }
    }
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn register(&self, record: &ServiceRecord) -> Result<(), RegistryError>;

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError>;
}

pub struct ConsulRegistry {
    client: Client,
    base_url: String,
}

impl ConsulRegistry {
    /// `timeout` bounds each request; there is no other deadline on registry calls.
    pub fn new(base_url: &str, timeout: Duration) -> reqwest::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .user_agent("nodejs-service registry client")
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn register(&self, record: &ServiceRecord) -> Result<(), RegistryError> {
        let url = format!("{}/v1/agent/service/register", self.base_url);
        debug!(url = %url, service_id = %record.id, "registering service");

        let response = self.client.put(url).json(record).send().await?;
        ensure_success(response).await
    }

    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let url = format!(
            "{}/v1/agent/service/deregister/{service_id}",
            self.base_url
        );
        debug!(url = %url, service_id = %service_id, "deregistering service");

        let response = self.client.put(url).send().await?;
        ensure_success(response).await
    }
}

async fn ensure_success(response: Response) -> Result<(), RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Status { status, body })
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            name: "nodejs-service".to_string(),
            instance_id: "nodejs-service-1700000000000".to_string(),
            address: "nodejs-service".to_string(),
            rpc_port: 9006,
            http_port: 9007,
        }
    }

    fn health_check() -> HealthCheck {
        HealthCheck {
            interval: "10s".to_string(),
            timeout: "5s".to_string(),
            deregister_critical_after: "30s".to_string(),
        }
    }

    fn client(url: &str) -> ConsulRegistry {
        ConsulRegistry::new(url, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn record_advertises_both_ports_and_health_url() {
        let record = ServiceRecord::new(&identity(), &health_check());

        assert_eq!(record.id, "nodejs-service-1700000000000");
        assert_eq!(record.port, 9006);
        assert_eq!(record.meta["http_port"], "9007");
        assert_eq!(record.meta["rpc_port"], "9006");
        assert_eq!(record.check.http, "http://nodejs-service:9007/health");
        assert_eq!(record.tags, vec!["grpc", "nodejs", "greeting"]);
    }

    #[tokio::test]
    async fn register_puts_consul_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/v1/agent/service/register")
            .match_body(Matcher::PartialJson(json!({
                "ID": "nodejs-service-1700000000000",
                "Name": "nodejs-service",
                "Port": 9006,
                "Check": {
                    "HTTP": "http://nodejs-service:9007/health",
                    "Interval": "10s",
                    "Timeout": "5s",
                    "DeregisterCriticalServiceAfter": "30s"
                }
            })))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let record = ServiceRecord::new(&identity(), &health_check());
        let result = client(&server.url()).register(&record).await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn deregister_targets_instance_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/v1/agent/service/deregister/nodejs-service-1700000000000")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let result = client(&server.url())
            .deregister("nodejs-service-1700000000000")
            .await;

        assert!(result.is_ok());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/v1/agent/service/register")
            .with_status(500)
            .with_body("agent unavailable")
            .expect(1)
            .create_async()
            .await;

        let record = ServiceRecord::new(&identity(), &health_check());
        let result = client(&server.url()).register(&record).await;

        match result {
            Err(RegistryError::Status { status, body }) => {
                assert_eq!(status.as_u16(), 500);
                assert_eq!(body, "agent unavailable");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_registry_is_an_error() {
        // Nothing listens on port 1
        let result = client("http://127.0.0.1:1").deregister("any").await;
        assert!(matches!(result, Err(RegistryError::Request(_))));
    }
}
