//! Transport-independent greeting logic shared by the gRPC and HTTP listeners.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Name advertised to the registry and echoed by the HTTP API.
pub const SERVICE_NAME: &str = "nodejs-service";

pub const DEFAULT_NAME: &str = "World";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Greeting {
    pub message: String,
    pub timestamp: String,
}

/// Which listener is answering. Only the info message differs between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Rpc,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GreetingInfo {
    pub service_name: &'static str,
    pub language: &'static str,
    pub version: &'static str,
    pub message: &'static str,
}

/// The name a greeting is addressed to: [`DEFAULT_NAME`] when absent or empty.
pub fn resolve_name(name: Option<&str>) -> &str {
    match name {
        Some(n) if !n.is_empty() => n,
        _ => DEFAULT_NAME,
    }
}

/// Build a greeting for `name` (see [`resolve_name`]). The timestamp is taken
/// fresh on every call.
pub fn greet(name: Option<&str>) -> Greeting {
    let name = resolve_name(name);

    Greeting {
        message: format!("Hello from Node.js, {name}!"),
        timestamp: now_iso8601(),
    }
}

pub const fn info(transport: Transport) -> GreetingInfo {
    let message = match transport {
        Transport::Rpc => "Hello from Node.js gRPC service!",
        Transport::Http => "Hello from Node.js REST API!",
    };

    GreetingInfo {
        service_name: "Node.js Greeting Service",
        language: "Node.js",
        version: "1.0.0",
        message,
    }
}

// Millisecond precision with a `Z` suffix, e.g. 2024-05-01T12:00:00.123Z
fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn greet_uses_default_when_name_missing() {
        assert_eq!(greet(None).message, "Hello from Node.js, World!");
    }

    #[test]
    fn greet_uses_default_when_name_empty() {
        assert_eq!(greet(Some("")).message, "Hello from Node.js, World!");
    }

    #[test]
    fn resolve_name_falls_back_to_world() {
        assert_eq!(resolve_name(None), "World");
        assert_eq!(resolve_name(Some("")), "World");
        assert_eq!(resolve_name(Some("Ada")), "Ada");
    }

    #[test]
    fn greet_uses_given_name() {
        assert_eq!(greet(Some("Ada")).message, "Hello from Node.js, Ada!");
    }

    #[test]
    fn greet_timestamps_are_iso8601_and_non_decreasing() {
        let first = greet(Some("a"));
        let second = greet(Some("b"));

        let t1 = DateTime::parse_from_rfc3339(&first.timestamp).expect("first timestamp");
        let t2 = DateTime::parse_from_rfc3339(&second.timestamp).expect("second timestamp");

        assert!(first.timestamp.ends_with('Z'));
        assert!(t2 >= t1);
    }

    #[test]
    fn info_is_constant() {
        assert_eq!(info(Transport::Rpc), info(Transport::Rpc));
        assert_eq!(info(Transport::Http), info(Transport::Http));

        let rpc = info(Transport::Rpc);
        assert_eq!(rpc.service_name, "Node.js Greeting Service");
        assert_eq!(rpc.language, "Node.js");
        assert_eq!(rpc.version, "1.0.0");
        assert_eq!(rpc.message, "Hello from Node.js gRPC service!");
        assert_eq!(info(Transport::Http).message, "Hello from Node.js REST API!");
    }

    #[test]
    fn info_serializes_camel_case() {
        let json = serde_json::to_value(info(Transport::Http)).unwrap();
        assert_eq!(json["serviceName"], "Node.js Greeting Service");
        assert_eq!(json["message"], "Hello from Node.js REST API!");
    }
}
