//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the catch-all gateway handler
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Dispatch each request and run it through the filter chain
//! - Serve until the shutdown signal fires

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{request::Parts, Request, Response as HttpResponse},
    response::Response,
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::filter::{FilterChain, FilterContext, Upstream};
use crate::http::request::{dispatch_request, read_origin, request_id};
use crate::http::response::{client_response, error_response};
use crate::observability::metrics;
use crate::observability::Analysis;
use crate::routing::{DispatchNode, Dispatcher, RoutingSnapshot, RoutingTable};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub table: Arc<RoutingTable>,
    pub dispatcher: Arc<Dispatcher>,
    pub chain: FilterChain,
    pub upstream: Arc<dyn Upstream>,
    pub analysis: Arc<Analysis>,
    pub max_body_bytes: usize,
}

/// HTTP front of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, state: AppState) -> Self {
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id())
                    .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all handler: dispatch, then filter chain and upstream.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let request_id = request_id(&parts.headers).to_string();
    let snapshot = state.table.load();

    let node = match state.dispatcher.dispatch(&snapshot, &dispatch_request(&parts)) {
        Ok(node) => node,
        Err(e) => {
            tracing::warn!(
                request_id = %request_id,
                method = %parts.method,
                path = %parts.uri.path(),
                error = %e,
                "Dispatch failed"
            );
            metrics::record_request("none", e.status_code().as_u16(), start);
            return error_response(&e);
        }
    };

    let api = node.api.meta.name.clone();
    tracing::debug!(
        request_id = %request_id,
        api = %api,
        server = node.server.id,
        path = %node.path,
        "Request dispatched"
    );

    match forward(&state, parts, body, client_addr, node, snapshot).await {
        Ok(response) => {
            metrics::record_request(&api, response.status().as_u16(), start);
            client_response(response)
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, api = %api, error = %e, "Request failed");
            metrics::record_request(&api, e.status_code().as_u16(), start);
            error_response(&e)
        }
    }
}

async fn forward(
    state: &AppState,
    parts: Parts,
    body: Body,
    client_addr: SocketAddr,
    node: DispatchNode,
    snapshot: Arc<RoutingSnapshot>,
) -> GatewayResult<HttpResponse<Bytes>> {
    let origin = read_origin(parts, body, client_addr, state.max_body_bytes).await?;
    let mut ctx = FilterContext::new(origin, node, snapshot, state.analysis.clone())?;

    state.chain.execute(&mut ctx, state.upstream.as_ref()).await?;

    ctx.response
        .take()
        .ok_or_else(|| GatewayError::Upstream("filter chain finished without a response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterFactory, FilterSpec};
    use crate::load_balancer::test_server;
    use crate::meta::{Api, Bind, Cluster, IpAccessControl, LoadBalance, NodeConf, Server, Status};
    use crate::routing::EventConsumer;
    use crate::script::RhaiEngine;
    use crate::store::StoreSnapshot;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    /// Answers with the server id and the forwarded URI.
    struct EchoUpstream;

    #[async_trait]
    impl Upstream for EchoUpstream {
        async fn call(&self, server: &Server, request: Request<Bytes>) -> GatewayResult<HttpResponse<Bytes>> {
            Ok(HttpResponse::new(Bytes::from(format!("{} {}", server.id, request.uri()))))
        }
    }

    fn router(filters: &[&str]) -> Router {
        router_with(filters, None)
    }

    fn router_with(filters: &[&str], ip_access: Option<IpAccessControl>) -> Router {
        router_from(GatewayConfig::default(), filters, ip_access)
    }

    fn router_from(config: GatewayConfig, filters: &[&str], ip_access: Option<IpAccessControl>) -> Router {
        let table = Arc::new(RoutingTable::new());
        let mut consumer = EventConsumer::new(table.clone(), Arc::new(RhaiEngine::new()));
        consumer.load(StoreSnapshot {
            clusters: vec![Cluster {
                id: 1,
                name: "items".into(),
                load_balance: LoadBalance::RoundRobin,
            }],
            servers: vec![test_server(1, 1)],
            binds: vec![Bind {
                cluster_id: 1,
                server_id: 1,
            }],
            apis: vec![Api {
                id: 1,
                name: "items".into(),
                url_pattern: "/items/{id}".into(),
                method: "GET".into(),
                status: Status::Up,
                nodes: vec![NodeConf {
                    cluster_id: 1,
                    url_rewrite: Some("/v1/items/$(param.id)".into()),
                    validations: vec![],
                }],
                ip_access,
                cache: None,
            }],
            ..Default::default()
        });

        let specs: Vec<FilterSpec> = filters.iter().map(|name| FilterSpec::builtin(*name)).collect();
        let state = AppState {
            table,
            dispatcher: Arc::new(Dispatcher::new()),
            chain: FilterFactory::new(config.options.clone()).build_chain(&specs).unwrap(),
            upstream: Arc::new(EchoUpstream),
            analysis: Arc::new(Analysis::new()),
            max_body_bytes: config.listener.max_body_bytes,
        };
        let client: SocketAddr = "10.0.0.1:40000".parse().unwrap();
        HttpServer::build_router(&config, state).layer(MockConnectInfo(client))
    }

    async fn send(router: Router, method: &str, uri: &str) -> (StatusCode, String, Option<String>) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned(), request_id)
    }

    #[tokio::test]
    async fn test_dispatch_and_forward() {
        let (status, body, request_id) = send(router(&["prepare"]), "GET", "/items/9").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1 /v1/items/9");
        assert!(request_id.is_some());
    }

    #[tokio::test]
    async fn test_method_mismatch_is_not_found() {
        let (status, body, _) = send(router(&[]), "DELETE", "/items/9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("no api matched"));
    }

    #[tokio::test]
    async fn test_filter_rejection_maps_status() {
        let access = IpAccessControl {
            whitelist: vec![],
            blacklist: vec!["10.0.0.*".into()],
        };
        let (status, body, request_id) = send(router_with(&["black-list"], Some(access)), "GET", "/items/1").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("blacklisted"));
        assert!(request_id.is_some());
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected_before_dispatch() {
        let mut config = GatewayConfig::default();
        config.listener.max_body_bytes = 8;
        let router = router_from(config, &[], None);

        let request = Request::builder()
            .method("GET")
            .uri("/items/1")
            .header("content-length", "32")
            .body(Body::from(vec![b'x'; 32]))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(response.headers().contains_key("x-request-id"));
    }
}
