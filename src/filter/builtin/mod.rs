//! Built-in filters.
//!
//! | Name            | Phase          | Effect                                      |
//! |-----------------|----------------|---------------------------------------------|
//! | prepare         | pre            | Host and framing headers for the upstream   |
//! | http-access     | post, post_err | access log line                             |
//! | header          | pre, post      | strips hop-by-hop headers                   |
//! | x-forward       | pre            | `X-Forwarded-*` headers                     |
//! | black-list      | pre            | 403 for blacklisted client IPs              |
//! | white-list      | pre            | 403 for clients outside a whitelist         |
//! | analysis        | all            | per-server counters                         |
//! | rate-limiting   | pre            | 429 over the server's `max_qps`             |
//! | circuit-breaker | all            | 503 while a server's circuit is open        |
//! | validation      | pre            | 400 on parameter rule violations            |
//! | caching         | pre, post      | serves and stores `GET` responses           |
//! | jwt             | pre            | 401 without a valid token                   |
//! | cross           | pre, post      | CORS preflight and response headers         |
//! | js-engine       | all            | runs the applied script plugins             |

mod access;
mod analysis;
mod caching;
mod circuit_breaker;
mod cross;
mod header;
mod ip_list;
mod js_engine;
mod jwt;
mod rate_limit;
mod validation;

pub use access::AccessFilter;
pub use analysis::AnalysisFilter;
pub use caching::{CachingFilter, CACHE_HIT_ATTR};
pub use circuit_breaker::CircuitBreakerFilter;
pub use cross::CrossFilter;
pub use header::{HeaderFilter, PrepareFilter, XForwardFilter};
pub use ip_list::{BlackListFilter, WhiteListFilter};
pub use js_engine::JsEngineFilter;
pub use jwt::{JwtFilter, JWT_CLAIMS_ATTR};
pub use rate_limit::RateLimitingFilter;
pub use validation::ValidationFilter;
