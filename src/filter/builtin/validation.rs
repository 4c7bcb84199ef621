//! Request parameter validation against the dispatch node's rules.

use async_trait::async_trait;
use axum::http::header::COOKIE;
use axum::http::StatusCode;

use crate::error::GatewayError;
use crate::filter::{Filter, FilterContext, FilterResult};
use crate::meta::ParameterSource;
use crate::routing::runtime::CompiledValidation;

#[derive(Debug, Default)]
pub struct ValidationFilter;

/// Read a parameter from the request; `None` when absent.
fn lookup(ctx: &FilterContext, validation: &CompiledValidation) -> Option<String> {
    let name = validation.parameter.name.as_str();
    let origin = ctx.origin();
    match validation.parameter.source {
        ParameterSource::Query => origin.query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        }),
        ParameterSource::Header => origin
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        ParameterSource::Cookie => origin
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.to_string()),
        ParameterSource::PathValue => ctx.dispatch_node().params.get(name).map(str::to_string),
    }
}

#[async_trait]
impl Filter for ValidationFilter {
    fn name(&self) -> &str {
        "validation"
    }

    async fn pre(&self, ctx: &mut FilterContext) -> FilterResult {
        let Some(node) = ctx.node() else {
            return Ok(StatusCode::OK);
        };

        for validation in &node.validations {
            let name = &validation.parameter.name;
            match lookup(ctx, validation) {
                None if validation.required => {
                    return Err(GatewayError::filter(
                        self.name(),
                        StatusCode::BAD_REQUEST,
                        format!("missing required parameter {}", name),
                    ));
                }
                None => {}
                Some(value) => {
                    if let Some(rule) = validation.rules.iter().find(|rule| !rule.is_match(&value)) {
                        return Err(GatewayError::filter(
                            self.name(),
                            StatusCode::BAD_REQUEST,
                            format!("parameter {} does not match {}", name, rule.as_str()),
                        ));
                    }
                }
            }
        }
        Ok(StatusCode::OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::context::test_support::{api, context_for};
    use crate::meta::{Parameter, Validation, ValidationRule};
    use axum::http::{HeaderMap, HeaderValue, Method};

    fn validation(name: &str, source: ParameterSource, required: bool, expr: &str) -> Validation {
        Validation {
            parameter: Parameter {
                name: name.into(),
                source,
            },
            required,
            rules: vec![ValidationRule {
                rule_type: Default::default(),
                expression: expr.into(),
            }],
        }
    }

    fn context(validations: Vec<Validation>, uri: &str, headers: HeaderMap) -> FilterContext {
        let mut api = api(1);
        api.nodes[0].validations = validations;
        context_for(api, Method::GET, uri, headers)
    }

    #[tokio::test]
    async fn test_query_and_path_values() {
        let validations = vec![
            validation("id", ParameterSource::PathValue, true, r"^\d+$"),
            validation("page", ParameterSource::Query, false, r"^\d+$"),
        ];

        let mut ctx = context(validations.clone(), "/items/42?page=3", HeaderMap::new());
        assert_eq!(ValidationFilter.pre(&mut ctx).await.unwrap(), StatusCode::OK);

        let mut ctx = context(validations.clone(), "/items/abc", HeaderMap::new());
        let err = ValidationFilter.pre(&mut ctx).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let mut ctx = context(validations, "/items/42?page=x", HeaderMap::new());
        assert!(ValidationFilter.pre(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_required_header_and_cookie() {
        let validations = vec![
            validation("x-tenant", ParameterSource::Header, true, "^[a-z]+$"),
            validation("session", ParameterSource::Cookie, true, "^s-"),
        ];

        let mut ctx = context(validations.clone(), "/items/1", HeaderMap::new());
        let err = ValidationFilter.pre(&mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("x-tenant"));

        let mut headers = HeaderMap::new();
        headers.insert("x-tenant", HeaderValue::from_static("acme"));
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; session=s-123"));
        let mut ctx = context(validations, "/items/1", headers);
        assert_eq!(ValidationFilter.pre(&mut ctx).await.unwrap(), StatusCode::OK);
    }
}
