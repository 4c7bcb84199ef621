//! Externally compiled filters.
//!
//! # Design Decisions
//! - The factory only sees `FilterProvider`; the dynamic loading facility
//!   is one implementation of it
//! - A shared library exports `new_external_filter`, returning an owned
//!   filter pointer
//! - Each loaded filter keeps its library alive and is dropped before it
//! - Load or symbol failures are fatal when the chain is built

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use libloading::{Library, Symbol};

use crate::error::{GatewayError, GatewayResult};
use crate::filter::{Filter, FilterContext, FilterResult};

/// Symbol every external filter library must export.
pub const CONSTRUCTOR_SYMBOL: &[u8] = b"new_external_filter";

/// Signature of [`CONSTRUCTOR_SYMBOL`].
pub type FilterConstructor = unsafe extern "C" fn() -> *mut dyn Filter;

/// Resolves external filter artifacts into filters.
pub trait FilterProvider: Send + Sync {
    fn load(&self, path: &Path) -> GatewayResult<Box<dyn Filter>>;
}

/// Loads filters from shared libraries with `libloading`.
#[derive(Debug, Default)]
pub struct DylibFilterProvider;

impl FilterProvider for DylibFilterProvider {
    fn load(&self, path: &Path) -> GatewayResult<Box<dyn Filter>> {
        let load_err = |reason: String| GatewayError::PluginLoad {
            path: path.display().to_string(),
            reason,
        };

        if !path.is_file() {
            return Err(load_err("no such file".to_string()));
        }

        let library = unsafe { Library::new(path) }.map_err(|e| load_err(e.to_string()))?;
        let inner = {
            let constructor: Symbol<FilterConstructor> =
                unsafe { library.get(CONSTRUCTOR_SYMBOL) }.map_err(|e| load_err(e.to_string()))?;
            let raw = unsafe { constructor() };
            if raw.is_null() {
                return Err(load_err("constructor returned null".to_string()));
            }
            unsafe { Box::from_raw(raw) }
        };

        tracing::info!(path = %path.display(), filter = inner.name(), "Loaded external filter");
        Ok(Box::new(ExternalFilter {
            inner,
            _library: Arc::new(library),
        }))
    }
}

/// A filter from a shared library, paired with that library.
pub struct ExternalFilter {
    // declared first: dropped before the library is unloaded
    inner: Box<dyn Filter>,
    _library: Arc<Library>,
}

impl fmt::Debug for ExternalFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFilter").field("inner", &self.inner).finish()
    }
}

#[async_trait]
impl Filter for ExternalFilter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn init(&mut self, cfg: &str) -> GatewayResult<()> {
        self.inner.init(cfg)
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        self.inner.pre(ctx).await
    }

    async fn post(&self, ctx: &mut FilterContext) -> FilterResult {
        self.inner.post(ctx).await
    }

    async fn post_err(&self, ctx: &mut FilterContext, status: StatusCode, err: &GatewayError) {
        self.inner.post_err(ctx, status, err).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_artifact() {
        let err = DylibFilterProvider
            .load(Path::new("/nonexistent/filters/libaudit.so"))
            .unwrap_err();
        assert!(matches!(err, GatewayError::PluginLoad { .. }));
        assert!(err.to_string().contains("libaudit.so"));
    }

    #[test]
    fn test_not_a_library() {
        let path = std::env::temp_dir().join(format!("gateway-dispatch-not-a-lib-{}.so", std::process::id()));
        std::fs::write(&path, b"plain text").unwrap();
        let err = DylibFilterProvider.load(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, GatewayError::PluginLoad { .. }));
    }
}
