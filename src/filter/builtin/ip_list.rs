//! Black-List and White-List filters over `Api::ip_access`.
//!
//! An entry is either an exact address or a prefix ending in `*`
//! (`10.0.*`).

use std::net::IpAddr;

use async_trait::async_trait;
use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};

fn listed(entries: &[String], ip: &IpAddr) -> bool {
    let ip = ip.to_string();
    entries.iter().any(|entry| match entry.strip_suffix('*') {
        Some(prefix) => ip.starts_with(prefix),
        None => *entry == ip,
    })
}

/// Rejects clients on the API's blacklist.
#[derive(Debug, Default)]
pub struct BlackListFilter;

#[async_trait]
impl Filter for BlackListFilter {
    fn name(&self) -> &str {
        "black-list"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let ip = ctx.origin().client_ip();
        if let Some(access) = &ctx.api().meta.ip_access {
            if listed(&access.blacklist, &ip) {
                return Err(GatewayError::filter(
                    self.name(),
                    StatusCode::FORBIDDEN,
                    format!("{} is blacklisted", ip),
                ));
            }
        }
        Ok(StatusCode::OK)
    }
}

/// Admits only clients on the API's whitelist, when it has one.
#[derive(Debug, Default)]
pub struct WhiteListFilter;

#[async_trait]
impl Filter for WhiteListFilter {
    fn name(&self) -> &str {
        "white-list"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let ip = ctx.origin().client_ip();
        match &ctx.api().meta.ip_access {
            Some(access) if !access.whitelist.is_empty() && !listed(&access.whitelist, &ip) => Err(
                GatewayError::filter(self.name(), StatusCode::FORBIDDEN, format!("{} is not whitelisted", ip)),
            ),
            _ => Ok(StatusCode::OK),
        }
    }
}
