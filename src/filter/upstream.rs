//! Upstream call performed between the Pre and Post phases.
//!
//! # Design Decisions
//! - Behind a trait so the chain can be driven without a network in tests
//! - Bodies are buffered on both sides; the limit protects gateway memory
//! - Timeout maps to 504, connection or protocol failure to 502

use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;

use crate::error::{GatewayError, GatewayResult};
use crate::meta::Server;

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn call(&self, server: &Server, request: Request<Bytes>) -> GatewayResult<Response<Bytes>>;
}

/// HTTP/1.1 upstream over a pooled `hyper-util` client.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpUpstream {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            timeout,
            max_body_bytes,
        }
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn call(&self, server: &Server, request: Request<Bytes>) -> GatewayResult<Response<Bytes>> {
        let (mut parts, body) = request.into_parts();
        let target = format!(
            "http://{}{}",
            server.addr,
            parts.uri.path_and_query().map(|p| p.as_str()).unwrap_or("/")
        );
        parts.uri = target
            .parse::<Uri>()
            .map_err(|e| GatewayError::Upstream(format!("invalid upstream uri: {}", e)))?;
        let request = Request::from_parts(parts, Body::from(body));

        let response = match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::warn!(server = server.id, addr = %server.addr, error = %e, "Upstream request failed");
                return Err(GatewayError::Upstream(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(server = server.id, addr = %server.addr, "Upstream request timed out");
                return Err(GatewayError::UpstreamTimeout(self.timeout.as_millis() as u64));
            }
        };

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), self.max_body_bytes)
            .await
            .map_err(|e| GatewayError::Upstream(format!("failed to read upstream body: {}", e)))?;
        Ok(Response::from_parts(parts, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::test_server;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_call_and_connection_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket
                    .write_all(b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = socket.shutdown().await;
            }
        });

        let upstream = HttpUpstream::new(Duration::from_secs(2), 1024);
        let mut server = test_server(1, 1);
        server.addr = addr.to_string();

        let request = Request::builder().uri("/x").body(Bytes::new()).unwrap();
        let response = upstream.call(&server, request).await.unwrap();
        assert_eq!(response.status().as_u16(), 201);
        assert_eq!(response.body().as_ref(), b"ok");

        // nothing listens there any more
        let request = Request::builder().uri("/x").body(Bytes::new()).unwrap();
        let err = upstream.call(&server, request).await.unwrap_err();
        assert_eq!(err.status_code().as_u16(), 502);
    }
}
