//! Filter factory.
//!
//! Builds filters from `[[filters]]` specs: external specs go to the
//! `FilterProvider`, built-in names are looked up in a static constructor
//! table. Names are matched case-insensitively, ignoring `-` and `_`.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::filter::builtin::{
    AccessFilter, AnalysisFilter, BlackListFilter, CachingFilter, CircuitBreakerFilter, CrossFilter,
    HeaderFilter, JsEngineFilter, JwtFilter, PrepareFilter, RateLimitingFilter, ValidationFilter,
    WhiteListFilter, XForwardFilter,
};
use crate::filter::external::{DylibFilterProvider, FilterProvider};
use crate::filter::{Filter, FilterChain};

/// One entry of the configured filter list.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterSpec {
    pub name: String,
    pub external: bool,
    pub external_path: Option<String>,
    /// Passed to `Filter::init`.
    pub config: Option<String>,
}

impl FilterSpec {
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Gateway-level options some built-ins need.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Upper bound of cached response bytes.
    pub limit_bytes_caching: u64,
    pub jwt_config_file: Option<String>,
    pub cross_config_file: Option<String>,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            limit_bytes_caching: 64 * 1024 * 1024,
            jwt_config_file: None,
            cross_config_file: None,
        }
    }
}

type Constructor = fn(&FilterOptions) -> GatewayResult<Box<dyn Filter>>;

const BUILTINS: &[(&str, Constructor)] = &[
    ("PREPARE", |_| Ok(Box::new(PrepareFilter))),
    ("HTTPACCESS", |_| Ok(Box::new(AccessFilter))),
    ("HEADER", |_| Ok(Box::new(HeaderFilter))),
    ("XFORWARD", |_| Ok(Box::new(XForwardFilter))),
    ("BLACKLIST", |_| Ok(Box::new(BlackListFilter))),
    ("WHITELIST", |_| Ok(Box::new(WhiteListFilter))),
    ("ANALYSIS", |_| Ok(Box::new(AnalysisFilter))),
    ("RATELIMITING", |_| Ok(Box::new(RateLimitingFilter::new()))),
    ("CIRCUITBREAKER", |_| Ok(Box::new(CircuitBreakerFilter::new()))),
    ("VALIDATION", |_| Ok(Box::new(ValidationFilter))),
    ("CACHING", |options| Ok(Box::new(CachingFilter::new(options.limit_bytes_caching)))),
    ("JWT", |options| {
        let mut filter = JwtFilter::default();
        filter.init(required(&options.jwt_config_file, "jwt_config_file")?)?;
        Ok(Box::new(filter))
    }),
    ("CROSS", |options| {
        let mut filter = CrossFilter::default();
        if let Some(path) = &options.cross_config_file {
            filter.init(path)?;
        }
        Ok(Box::new(filter))
    }),
    ("JSENGINE", |_| Ok(Box::new(JsEngineFilter))),
];

fn required<'a>(value: &'a Option<String>, option: &str) -> GatewayResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| GatewayError::Config(format!("options.{} is required", option)))
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

pub struct FilterFactory {
    options: FilterOptions,
    provider: Arc<dyn FilterProvider>,
}

impl FilterFactory {
    pub fn new(options: FilterOptions) -> Self {
        Self::with_provider(options, Arc::new(DylibFilterProvider))
    }

    pub fn with_provider(options: FilterOptions, provider: Arc<dyn FilterProvider>) -> Self {
        Self { options, provider }
    }

    /// Lookup key for a filter name; names equal under this key resolve
    /// to the same filter.
    pub fn canonical_name(name: &str) -> String {
        normalize(name)
    }

    /// Whether `name` is a built-in filter.
    pub fn is_builtin(name: &str) -> bool {
        let wanted = normalize(name);
        BUILTINS.iter().any(|(builtin, _)| *builtin == wanted)
    }

    pub fn build(&self, spec: &FilterSpec) -> GatewayResult<Box<dyn Filter>> {
        let mut filter = if spec.external {
            let path = spec.external_path.as_deref().ok_or_else(|| GatewayError::PluginLoad {
                path: String::new(),
                reason: format!("external filter {:?} has no external_path", spec.name),
            })?;
            self.provider.load(Path::new(path))?
        } else {
            let wanted = normalize(&spec.name);
            let (_, constructor) = BUILTINS
                .iter()
                .find(|(builtin, _)| *builtin == wanted)
                .ok_or_else(|| GatewayError::UnknownFilter(spec.name.clone()))?;
            constructor(&self.options)?
        };

        if let Some(cfg) = &spec.config {
            filter.init(cfg)?;
        }
        tracing::debug!(filter = filter.name(), external = spec.external, "Filter built");
        Ok(filter)
    }

    /// Build every spec in order; the first failure aborts.
    pub fn build_chain(&self, specs: &[FilterSpec]) -> GatewayResult<FilterChain> {
        let filters = specs
            .iter()
            .map(|spec| self.build(spec))
            .collect::<GatewayResult<Vec<_>>>()?;
        let chain = FilterChain::new(filters);
        tracing::info!(filters = ?chain.names(), "Filter chain built");
        Ok(chain)
    }
}
