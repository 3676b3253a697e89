//! Greeting service exposed over gRPC and HTTP at the same time, registered with
//! a Consul-style service registry for as long as both listeners are up.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod greeting;
pub mod grpc;
pub mod http;
pub mod identity;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod signals;

pub use coordinator::{Coordinator, CoordinatorOptions, LifecycleState};
pub use error::{LifecycleError, ListenerError, RegistryError};
pub use identity::ServiceIdentity;
pub use registry::{ConsulRegistry, Registry, ServiceRecord};
