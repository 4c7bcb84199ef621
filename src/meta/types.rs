//! Routing metadata objects as they arrive from the config store.
//!
//! All types derive Serde traits so the file store and tests can build
//! them from TOML documents.

use serde::{Deserialize, Serialize};

/// Live status of an upstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Up,
    Down,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Up => write!(f, "up"),
            Status::Down => write!(f, "down"),
        }
    }
}

/// Load-balance policy of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalance {
    #[default]
    RoundRobin,
    Random,
    WeightedRandom,
}

/// A named group of upstream servers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Cluster {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub load_balance: LoadBalance,
}

/// Active health check probe for a server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HealthCheck {
    pub path: String,
    #[serde(default = "default_check_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_check_timeout")]
    pub timeout_secs: u64,
}

fn default_check_interval() -> u64 {
    10
}

fn default_check_timeout() -> u64 {
    5
}

/// Circuit breaker thresholds for a server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CircuitBreakerConf {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a trial request is let through.
    pub open_timeout_secs: u64,
}

/// One upstream endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Server {
    pub id: u64,
    /// `host:port` of the upstream.
    pub addr: String,
    /// Capacity limit enforced by the Rate-Limiting filter.
    pub max_qps: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConf>,
}

fn default_weight() -> u32 {
    1
}

/// Cluster to server association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Bind {
    pub cluster_id: u64,
    pub server_id: u64,
}

impl Bind {
    /// Store key of a bind; binds have no identity of their own.
    pub fn key(&self) -> String {
        format!("{}-{}", self.cluster_id, self.server_id)
    }
}

/// Where a validated request parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterSource {
    Query,
    Header,
    Cookie,
    PathValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Parameter {
    pub name: String,
    pub source: ParameterSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    #[default]
    Regexp,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub rule_type: RuleType,
    pub expression: String,
}

/// Validation applied to one request parameter.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Validation {
    pub parameter: Parameter,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub rules: Vec<ValidationRule>,
}

/// Configured forwarding target of an API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeConf {
    pub cluster_id: u64,
    #[serde(default)]
    pub url_rewrite: Option<String>,
    #[serde(default)]
    pub validations: Vec<Validation>,
}

/// IP access lists checked by the Black-List / White-List filters.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct IpAccessControl {
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Response caching for an API.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheConf {
    pub ttl_secs: u64,
}

/// A configured gateway route.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Api {
    pub id: u64,
    pub name: String,
    pub url_pattern: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub nodes: Vec<NodeConf>,
    #[serde(default)]
    pub ip_access: Option<IpAccessControl>,
    #[serde(default)]
    pub cache: Option<CacheConf>,
}

fn default_method() -> String {
    "*".to_string()
}

/// Traffic-split rule diverting part of an API's requests.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Routing {
    pub id: u64,
    pub name: String,
    pub api_id: u64,
    pub cluster_id: u64,
    /// Percentage of requests sent to `cluster_id`, in (0, 100].
    pub traffic_rate: u32,
}

/// Script plugin.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Plugin {
    pub id: u64,
    pub name: String,
    pub version: u64,
    pub content: String,
}

/// Ordered, gateway-wide set of active plugins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct AppliedPlugins {
    #[serde(default)]
    pub applied: Vec<u64>,
}

/// A running gateway instance registered in the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Proxy {
    pub addr: String,
    #[serde(default)]
    pub admin_addr: Option<String>,
}
