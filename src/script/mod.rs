//! Embedded script runtime for plugins.
//!
//! # Data Flow
//! ```text
//! Plugin { content }
//!     → ScriptEngine::compile (validation and event consumer)
//!     → Arc<dyn ScriptPlugin> stored in the routing snapshot
//!     → JS-Engine filter calls pre/post/post_err per request
//! ```
//!
//! # Design Decisions
//! - The interpreter sits behind `ScriptEngine`; the filter chain never sees it
//! - Scripts are `rhai` sources defining any of `pre(req)`, `post(req)`,
//!   `post_err(req)`; each returns an HTTP status code
//! - A plugin defining none of the hooks is rejected at compile time
//! - Operation limits stop runaway scripts

use std::fmt;
use std::sync::Arc;

use rhai::{Dynamic, Engine, Map, Scope, AST, INT};

use crate::error::{GatewayError, GatewayResult};
use crate::meta::Plugin;

const HOOK_PRE: &str = "pre";
const HOOK_POST: &str = "post";
const HOOK_POST_ERR: &str = "post_err";

/// Request view handed to scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub client_ip: String,
    pub headers: Vec<(String, String)>,
    /// Upstream or error status, set for `post` and `post_err`.
    pub status: Option<u16>,
}

/// A compiled plugin.
pub trait ScriptPlugin: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Run the `pre` hook; `None` when the script does not define it.
    fn pre(&self, req: &ScriptRequest) -> GatewayResult<Option<u16>>;

    fn post(&self, req: &ScriptRequest) -> GatewayResult<Option<u16>>;

    fn post_err(&self, req: &ScriptRequest) -> GatewayResult<()>;
}

/// Compiles plugin sources into runnable plugins.
pub trait ScriptEngine: Send + Sync {
    fn compile(&self, plugin: &Plugin) -> GatewayResult<Arc<dyn ScriptPlugin>>;
}

/// `rhai`-backed script engine.
#[derive(Clone)]
pub struct RhaiEngine {
    engine: Arc<Engine>,
}

impl RhaiEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.set_max_operations(100_000);
        engine.set_max_call_levels(32);
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for RhaiEngine {
    fn compile(&self, plugin: &Plugin) -> GatewayResult<Arc<dyn ScriptPlugin>> {
        let ast = self
            .engine
            .compile(&plugin.content)
            .map_err(|e| GatewayError::Script(format!("{}: {}", plugin.name, e)))?;

        let defines = |hook: &str| ast.iter_functions().any(|f| f.name == hook && f.params.len() == 1);
        let hooks = Hooks {
            pre: defines(HOOK_PRE),
            post: defines(HOOK_POST),
            post_err: defines(HOOK_POST_ERR),
        };
        if !(hooks.pre || hooks.post || hooks.post_err) {
            return Err(GatewayError::Script(format!(
                "{}: defines none of pre(req), post(req), post_err(req)",
                plugin.name
            )));
        }

        Ok(Arc::new(RhaiPlugin {
            name: plugin.name.clone(),
            engine: self.engine.clone(),
            ast,
            hooks,
        }))
    }
}

#[derive(Debug, Clone, Copy)]
struct Hooks {
    pre: bool,
    post: bool,
    post_err: bool,
}

struct RhaiPlugin {
    name: String,
    engine: Arc<Engine>,
    ast: AST,
    hooks: Hooks,
}

impl fmt::Debug for RhaiPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiPlugin")
            .field("name", &self.name)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl RhaiPlugin {
    fn call(&self, hook: &str, req: &ScriptRequest) -> GatewayResult<Dynamic> {
        let mut scope = Scope::new();
        self.engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, hook, (request_map(req),))
            .map_err(|e| GatewayError::Script(format!("{}.{}: {}", self.name, hook, e)))
    }

    fn call_status(&self, hook: &str, req: &ScriptRequest) -> GatewayResult<u16> {
        let value = self.call(hook, req)?;
        let status = value.as_int().map_err(|ty| {
            GatewayError::Script(format!("{}.{} returned {} instead of a status", self.name, hook, ty))
        })?;
        u16::try_from(status)
            .ok()
            .filter(|s| (100..=599).contains(s))
            .ok_or_else(|| GatewayError::Script(format!("{}.{} returned invalid status {}", self.name, hook, status)))
    }
}

impl ScriptPlugin for RhaiPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn pre(&self, req: &ScriptRequest) -> GatewayResult<Option<u16>> {
        if !self.hooks.pre {
            return Ok(None);
        }
        self.call_status(HOOK_PRE, req).map(Some)
    }

    fn post(&self, req: &ScriptRequest) -> GatewayResult<Option<u16>> {
        if !self.hooks.post {
            return Ok(None);
        }
        self.call_status(HOOK_POST, req).map(Some)
    }

    fn post_err(&self, req: &ScriptRequest) -> GatewayResult<()> {
        if self.hooks.post_err {
            self.call(HOOK_POST_ERR, req)?;
        }
        Ok(())
    }
}

fn request_map(req: &ScriptRequest) -> Map {
    let mut headers = Map::new();
    for (name, value) in &req.headers {
        headers.insert(name.as_str().into(), Dynamic::from(value.clone()));
    }

    let mut map = Map::new();
    map.insert("method".into(), Dynamic::from(req.method.clone()));
    map.insert("path".into(), Dynamic::from(req.path.clone()));
    map.insert("query".into(), Dynamic::from(req.query.clone()));
    map.insert("client_ip".into(), Dynamic::from(req.client_ip.clone()));
    map.insert("headers".into(), Dynamic::from_map(headers));
    map.insert(
        "status".into(),
        Dynamic::from(req.status.map(INT::from).unwrap_or(0)),
    );
    map
}
