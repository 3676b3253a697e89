//! gRPC listener: `SayHello` and `GetGreetingInfo` over tonic.

use std::net::SocketAddr;

use greeting_proto::greeting::v1::greeting_service_server::{
    GreetingService, GreetingServiceServer,
};
use greeting_proto::greeting::v1::{
    GreetingInfoRequest, GreetingInfoResponse, HelloRequest, HelloResponse,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::info;

use crate::error::ListenerError;
use crate::greeting::{self, Transport};
use crate::listener::ListenerHandle;

pub const LISTENER_NAME: &str = "grpc";

/// Translates protobuf envelopes to and from the plain greeting handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreetingRpc;

#[tonic::async_trait]
impl GreetingService for GreetingRpc {
    async fn say_hello(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        let req = request.into_inner();
        let name = greeting::resolve_name(Some(req.name.as_str()));
        info!(name, "SayHello called");
        let greeting = greeting::greet(Some(name));

        Ok(Response::new(HelloResponse {
            message: greeting.message,
            timestamp: greeting.timestamp,
        }))
    }

    async fn get_greeting_info(
        &self,
        _request: Request<GreetingInfoRequest>,
    ) -> Result<Response<GreetingInfoResponse>, Status> {
        info!("GetGreetingInfo called");
        let info = greeting::info(Transport::Rpc);

        Ok(Response::new(GreetingInfoResponse {
            service_name: info.service_name.to_string(),
            language: info.language.to_string(),
            version: info.version.to_string(),
            message: info.message.to_string(),
        }))
    }
}

/// Bind `addr` and start serving. Bind errors are returned before anything is spawned.
pub async fn bind(
    addr: SocketAddr,
    failures: mpsc::Sender<&'static str>,
) -> Result<ListenerHandle, std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let serve = async move {
        Server::builder()
            .add_service(GreetingServiceServer::new(GreetingRpc))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn say_hello_defaults_empty_name() {
        let response = GreetingRpc
            .say_hello(Request::new(HelloRequest {
                name: String::new(),
            }))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.message, "Hello from Node.js, World!");
        assert!(!response.timestamp.is_empty());
    }

    #[tokio::test]
    async fn get_greeting_info_reports_rpc_message() {
        let response = GreetingRpc
            .get_greeting_info(Request::new(GreetingInfoRequest {}))
            .await
            .unwrap()
            .into_inner();

        assert_eq!(response.service_name, "Node.js Greeting Service");
        assert_eq!(response.message, "Hello from Node.js gRPC service!");
    }
}
