//! Filter chain execution.
//!
//! # Protocol
//! ```text
//! Pre:      F1 → F2 → ... → Fn       (stop at the first rejection)
//! Upstream: unless a Pre already set ctx.response
//! Post:     Fn → ... → F2 → F1
//!
//! Pre rejected at Fi:     PostErr on Fi..F1
//! Upstream failed:        PostErr on Fn..F1
//! Post rejected at Fi:    PostErr on Fi-1..F1
//! ```

use std::sync::Arc;

use axum::http::StatusCode;

use crate::error::{GatewayError, GatewayResult};
use crate::filter::upstream::Upstream;
use crate::filter::{is_pass, Filter, FilterContext};
use crate::observability::metrics;

/// Ordered filters, fixed once built.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Arc<Vec<Box<dyn Filter>>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self {
            filters: Arc::new(filters),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run one request through the chain.
    ///
    /// On success `ctx.response` holds the response for the client. On
    /// failure the returned error carries the client-visible status and the
    /// unwind has already run.
    pub async fn execute(&self, ctx: &mut FilterContext, upstream: &dyn Upstream) -> GatewayResult<()> {
        let filters = self.filters.as_slice();
        let result = self.run(filters, ctx, upstream).await;
        ctx.finish();
        result
    }

    async fn run(
        &self,
        filters: &[Box<dyn Filter>],
        ctx: &mut FilterContext,
        upstream: &dyn Upstream,
    ) -> GatewayResult<()> {
        for (index, filter) in filters.iter().enumerate() {
            if let Err(err) = check(filter.as_ref(), filter.pre(ctx).await, "pre") {
                metrics::record_filter_rejection(filter.name());
                unwind(&filters[..=index], ctx, &err).await;
                return Err(err);
            }
        }

        if ctx.response.is_none() {
            let request = ctx.forward().clone();
            let server = ctx.server().clone();
            match upstream.call(&server, request).await {
                Ok(response) => ctx.response = Some(response),
                Err(err) => {
                    unwind(filters, ctx, &err).await;
                    return Err(err);
                }
            }
        }

        for index in (0..filters.len()).rev() {
            let filter = &filters[index];
            if let Err(err) = check(filter.as_ref(), filter.post(ctx).await, "post") {
                metrics::record_filter_rejection(filter.name());
                unwind(&filters[..index], ctx, &err).await;
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Turn a rejecting status into an error naming the filter.
fn check(filter: &dyn Filter, result: Result<StatusCode, GatewayError>, phase: &str) -> GatewayResult<()> {
    match result {
        Ok(status) if is_pass(status) => Ok(()),
        Ok(status) => Err(GatewayError::filter(filter.name(), status, format!("rejected in {}", phase))),
        Err(err) => {
            tracing::debug!(filter = filter.name(), phase, error = %err, "Filter failed");
            Err(err)
        }
    }
}

async fn unwind(entered: &[Box<dyn Filter>], ctx: &mut FilterContext, err: &GatewayError) {
    let status = err.status_code();
    for filter in entered.iter().rev() {
        filter.post_err(ctx, status, err).await;
    }
}
