//! Response caching for APIs with a `cache` section.
//!
//! # Design Decisions
//! - Only `GET` requests are served from or stored in the cache
//! - Keyed by API id and the original path and query
//! - Only `200` responses are stored; entries expire after `ttl_secs`
//! - Least recently used entries are evicted once the stored bytes exceed
//!   `limit_bytes_caching`

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Response, StatusCode};
use lru::LruCache;

use crate::filter::{Filter, FilterContext, FilterResult};
use crate::observability::metrics;

/// Attribute set when the response was served from the cache.
pub const CACHE_HIT_ATTR: &str = "cache.hit";

#[derive(Debug, Clone)]
struct CachedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    expires_at: Instant,
}

impl CachedResponse {
    fn size(&self) -> u64 {
        self.body.len() as u64
    }

    fn to_response(&self) -> Response<Bytes> {
        let mut response = Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

#[derive(Debug)]
struct CacheState {
    entries: LruCache<String, CachedResponse>,
    bytes: u64,
}

#[derive(Debug)]
pub struct CachingFilter {
    limit_bytes: u64,
    state: Mutex<CacheState>,
}

impl CachingFilter {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            limit_bytes,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    fn key(ctx: &FilterContext) -> Option<(String, Duration)> {
        let cache = ctx.api().meta.cache.as_ref()?;
        if ctx.origin().method != Method::GET {
            return None;
        }
        let path = ctx
            .origin()
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        Some((format!("{}:{}", ctx.api().id(), path), Duration::from_secs(cache.ttl_secs)))
    }

    fn lookup(&self, key: &str) -> Option<Response<Bytes>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match state.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.to_response()),
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some(entry) = state.entries.pop(key) {
                state.bytes -= entry.size();
            }
        }
        None
    }

    fn store(&self, key: String, entry: CachedResponse) {
        if entry.size() > self.limit_bytes {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.bytes += entry.size();
        if let Some(previous) = state.entries.put(key, entry) {
            state.bytes -= previous.size();
        }
        while state.bytes > self.limit_bytes {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.bytes -= evicted.size(),
                None => break,
            }
        }
    }

    #[cfg(test)]
    fn stored_bytes(&self) -> u64 {
        self.state.lock().unwrap().bytes
    }
}

#[async_trait]
impl Filter for CachingFilter {
    fn name(&self) -> &str {
        "caching"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let Some((key, _)) = Self::key(ctx) else {
            return Ok(StatusCode::OK);
        };
        let hit = self.lookup(&key);
        metrics::record_cache(hit.is_some());
        if let Some(response) = hit {
            tracing::debug!(key = %key, "Served from cache");
            ctx.set_attr(CACHE_HIT_ATTR, true);
            ctx.response = Some(response);
        }
        Ok(StatusCode::OK)
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        if ctx.has_attr(CACHE_HIT_ATTR) {
            return Ok(StatusCode::OK);
        }
        let Some((key, ttl)) = Self::key(ctx) else {
            return Ok(StatusCode::OK);
        };
        if let Some(response) = ctx.response.as_ref().filter(|r| r.status() == StatusCode::OK) {
            self.store(
                key,
                CachedResponse {
                    status: response.status(),
                    headers: response.headers().clone(),
                    body: response.body().clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        Ok(StatusCode::OK)
    }
}
