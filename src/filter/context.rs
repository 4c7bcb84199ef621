//! Per-request filter context.
//!
//! # Responsibilities
//! - Carry the original request, the forwarded copy and the response
//! - Expose the resolved API, dispatch node and server
//! - Provide an attribute store for filter-to-filter communication
//!
//! # Design Decisions
//! - Owned by one request; no internal synchronization
//! - Attributes are written and read in chain order. A filter reading an
//!   attribute must be placed after the filter writing it
//! - The routing snapshot is the one the request was dispatched against

use std::any::Any;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Request, Response, Uri};

use crate::error::{GatewayError, GatewayResult};
use crate::meta::Server;
use crate::observability::analysis::Analysis;
use crate::routing::{ApiRuntime, DispatchNode, NodeRuntime, RoutingSnapshot};

/// The request as received from the client, body buffered.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_addr: SocketAddr,
    pub body: Bytes,
}

impl OriginRequest {
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_addr.ip()
    }
}

pub struct FilterContext {
    start_at: Instant,
    end_at: Option<Instant>,
    origin: OriginRequest,
    forward: Request<Bytes>,
    /// Set by the upstream call, or by a filter serving the request itself.
    pub response: Option<Response<Bytes>>,
    node: DispatchNode,
    snapshot: Arc<RoutingSnapshot>,
    analysis: Arc<Analysis>,
    attrs: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl FilterContext {
    pub fn new(
        origin: OriginRequest,
        node: DispatchNode,
        snapshot: Arc<RoutingSnapshot>,
        analysis: Arc<Analysis>,
    ) -> GatewayResult<Self> {
        let uri = Uri::try_from(node.path.as_str())
            .map_err(|e| GatewayError::BadRequest(format!("invalid forward path {:?}: {}", node.path, e)))?;

        let mut forward = Request::new(origin.body.clone());
        *forward.method_mut() = origin.method.clone();
        *forward.uri_mut() = uri;
        *forward.headers_mut() = origin.headers.clone();

        Ok(Self {
            start_at: Instant::now(),
            end_at: None,
            origin,
            forward,
            response: None,
            node,
            snapshot,
            analysis,
            attrs: HashMap::new(),
        })
    }

    pub fn start_at(&self) -> Instant {
        self.start_at
    }

    pub fn end_at(&self) -> Option<Instant> {
        self.end_at
    }

    pub(crate) fn finish(&mut self) {
        self.end_at = Some(Instant::now());
    }

    pub fn origin(&self) -> &OriginRequest {
        &self.origin
    }

    pub fn forward(&self) -> &Request<Bytes> {
        &self.forward
    }

    pub fn forward_mut(&mut self) -> &mut Request<Bytes> {
        &mut self.forward
    }

    pub fn api(&self) -> &ApiRuntime {
        &self.node.api
    }

    pub fn dispatch_node(&self) -> &DispatchNode {
        &self.node
    }

    /// Node rules (rewrite, validations) for this request.
    pub fn node(&self) -> Option<&NodeRuntime> {
        self.node.node()
    }

    pub fn server(&self) -> &Server {
        &self.node.server
    }

    pub fn snapshot(&self) -> &RoutingSnapshot {
        &self.snapshot
    }

    pub fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    pub fn set_attr<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.attrs.insert(key.into(), Box::new(value));
    }

    /// Read an attribute set by an earlier filter; `None` on type mismatch.
    pub fn attr<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.attrs.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn has_attr(&self, key: &str) -> bool {
        self.attrs.contains_key(key)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{api, context};
    use super::*;
    use crate::load_balancer::test_server;

    #[test]
    fn test_attributes() {
        let mut ctx = context("/items/1");
        ctx.set_attr("user", String::from("alice"));
        assert_eq!(ctx.attr::<String>("user").map(String::as_str), Some("alice"));
        assert!(ctx.attr::<u64>("user").is_none());
        assert!(ctx.attr::<String>("missing").is_none());
    }

    #[test]
    fn test_forward_request_copies_origin() {
        let ctx = context("/items/1?x=2");
        assert_eq!(ctx.forward().uri().to_string(), "/items/1?x=2");
        assert_eq!(ctx.forward().method(), &ctx.origin().method);
        assert_eq!(ctx.server().id, 1);
    }

    #[test]
    fn test_unrenderable_forward_path_is_bad_request() {
        // a header value rendered into the path by a rewrite
        let runtime = Arc::new(ApiRuntime::compile(&api(1)).unwrap());
        let node = DispatchNode {
            api: runtime,
            cluster_id: 1,
            routing_id: None,
            server: test_server(1, 1),
            path: "/tenants/a b/items".into(),
            params: Default::default(),
        };
        let origin = OriginRequest {
            method: Method::GET,
            uri: "/items/1".parse().unwrap(),
            headers: HeaderMap::new(),
            client_addr: "10.1.2.3:5000".parse().unwrap(),
            body: Bytes::new(),
        };

        let err = FilterContext::new(origin, node, Arc::new(RoutingSnapshot::default()), Arc::new(Analysis::new()))
            .err()
            .unwrap();
        assert!(matches!(err, GatewayError::BadRequest(_)));
        assert_eq!(err.status_code().as_u16(), 400);
    }
}
