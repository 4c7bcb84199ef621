//! Runs the applied script plugins.
//!
//! Plugins come from the snapshot the request was dispatched against, in
//! applied order for `pre` and reverse order for `post` and `post_err`.
//! A returned status of 400 or above rejects the request. Only plugins
//! whose `pre` ran take part in `post_err`.

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::filter::{is_pass, Filter, FilterContext, FilterResult};
use crate::script::ScriptRequest;

/// Number of plugins whose `pre` ran for this request.
const ENTERED_ATTR: &str = "js_engine.entered";

#[derive(Debug, Default)]
pub struct JsEngineFilter;

fn script_request(ctx: &FilterContext, status: Option<StatusCode>) -> ScriptRequest {
    let origin = ctx.origin();
    ScriptRequest {
        method: origin.method.to_string(),
        path: origin.path().to_string(),
        query: origin.query().unwrap_or_default().to_string(),
        client_ip: origin.client_ip().to_string(),
        headers: origin
            .headers
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
            .collect(),
        status: status.map(|s| s.as_u16()),
    }
}

impl JsEngineFilter {
    fn verdict(&self, plugin: &str, status: Option<u16>) -> FilterResult {
        let Some(status) = status else {
            return Ok(StatusCode::OK);
        };
        let status = StatusCode::from_u16(status)
            .map_err(|e| GatewayError::Script(format!("{}: {}", plugin, e)))?;
        if is_pass(status) {
            Ok(StatusCode::OK)
        } else {
            Err(GatewayError::filter(
                self.name(),
                status,
                format!("rejected by plugin {}", plugin),
            ))
        }
    }
}

#[async_trait]
impl Filter for JsEngineFilter {
    fn name(&self) -> &str {
        "js-engine"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let req = script_request(ctx, None);
        let mut entered = 0usize;
        let mut result = Ok(StatusCode::OK);
        for plugin in ctx.snapshot().applied_plugins() {
            entered += 1;
            result = plugin
                .script
                .pre(&req)
                .and_then(|status| self.verdict(&plugin.meta.name, status));
            if result.is_err() {
                break;
            }
        }
        ctx.set_attr(ENTERED_ATTR, entered);
        result
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        let status = ctx.response.as_ref().map(|r| r.status());
        let req = script_request(ctx, status);
        let plugins: Vec<_> = ctx.snapshot().applied_plugins().collect();
        for plugin in plugins.into_iter().rev() {
            self.verdict(&plugin.meta.name, plugin.script.post(&req)?)?;
        }
        Ok(StatusCode::OK)
    }

    async fn post_err(&self, ctx: &mut FilterContext, status: StatusCode, _err: &GatewayError) {
        let req = script_request(ctx, Some(status));
        let entered = ctx.attr::<usize>(ENTERED_ATTR).copied().unwrap_or(0);
        let plugins: Vec<_> = ctx.snapshot().applied_plugins().take(entered).collect();
        for plugin in plugins.into_iter().rev() {
            if let Err(e) = plugin.script.post_err(&req) {
                tracing::warn!(plugin = %plugin.meta.name, error = %e, "Plugin post_err failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayResult;
    use crate::filter::context::test_support::{api, context_in};
    use crate::meta::{AppliedPlugins, Plugin};
    use crate::routing::{CompiledPlugin, RoutingSnapshot};
    use crate::script::{RhaiEngine, ScriptEngine, ScriptPlugin};
    use axum::http::{HeaderMap, Method};
    use std::sync::{Arc, Mutex};

    fn snapshot(sources: &[(u64, &str)]) -> Arc<RoutingSnapshot> {
        let engine = RhaiEngine::new();
        let mut snapshot = RoutingSnapshot::default();
        for (id, content) in sources {
            let meta = Plugin {
                id: *id,
                name: format!("plugin-{}", id),
                version: 1,
                content: content.to_string(),
            };
            let script = engine.compile(&meta).unwrap();
            snapshot.plugins.insert(*id, CompiledPlugin { meta, script });
        }
        snapshot.applied = AppliedPlugins {
            applied: sources.iter().map(|(id, _)| *id).collect(),
        };
        Arc::new(snapshot)
    }

    #[tokio::test]
    async fn test_plugin_rejects_path() {
        let snapshot = snapshot(&[
            (1, r#"fn pre(req) { 200 }"#),
            (2, r#"fn pre(req) { if req.path == "/items/7" { 403 } else { 200 } }"#),
        ]);

        let mut ctx = context_in(snapshot.clone(), api(1), Method::GET, "/items/1", HeaderMap::new());
        assert_eq!(JsEngineFilter.pre(&mut ctx).await.unwrap(), StatusCode::OK);

        let mut ctx = context_in(snapshot, api(1), Method::GET, "/items/7", HeaderMap::new());
        let err = JsEngineFilter.pre(&mut ctx).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert!(err.to_string().contains("plugin-2"));
    }

    #[tokio::test]
    async fn test_post_sees_upstream_status() {
        let snapshot = snapshot(&[(1, r#"fn post(req) { if req.status >= 500 { 502 } else { 200 } }"#)]);
        let mut ctx = context_in(snapshot, api(1), Method::GET, "/items/1", HeaderMap::new());

        let mut response = axum::http::Response::new(axum::body::Bytes::new());
        *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
        ctx.response = Some(response);
        let err = JsEngineFilter.post(&mut ctx).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_script_error_is_reported() {
        let snapshot = snapshot(&[(1, r#"fn pre(req) { throw "boom"; }"#)]);
        let mut ctx = context_in(snapshot, api(1), Method::GET, "/items/1", HeaderMap::new());
        let err = JsEngineFilter.pre(&mut ctx).await.unwrap_err();
        assert!(matches!(err, GatewayError::Script(_)));
    }

    /// Records every hook it runs into a shared log.
    #[derive(Debug)]
    struct Recording {
        name: String,
        pre_status: u16,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptPlugin for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn pre(&self, _req: &ScriptRequest) -> GatewayResult<Option<u16>> {
            self.log.lock().unwrap().push(format!("pre {}", self.name));
            Ok(Some(self.pre_status))
        }

        fn post(&self, _req: &ScriptRequest) -> GatewayResult<Option<u16>> {
            Ok(None)
        }

        fn post_err(&self, _req: &ScriptRequest) -> GatewayResult<()> {
            self.log.lock().unwrap().push(format!("post_err {}", self.name));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_post_err_unwinds_only_entered_plugins() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut snapshot = RoutingSnapshot::default();
        for (id, pre_status) in [(1, 200), (2, 401), (3, 200)] {
            let meta = Plugin {
                id,
                name: format!("p{}", id),
                version: 1,
                content: String::new(),
            };
            let script = Arc::new(Recording {
                name: meta.name.clone(),
                pre_status,
                log: log.clone(),
            });
            snapshot.plugins.insert(id, CompiledPlugin { meta, script });
        }
        snapshot.applied = AppliedPlugins { applied: vec![1, 2, 3] };

        let mut ctx = context_in(Arc::new(snapshot), api(1), Method::GET, "/items/1", HeaderMap::new());
        let err = JsEngineFilter.pre(&mut ctx).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        JsEngineFilter.post_err(&mut ctx, err.status_code(), &err).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["pre p1", "pre p2", "post_err p2", "post_err p1"]
        );
    }
}
