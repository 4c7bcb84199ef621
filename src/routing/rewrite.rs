//! URL rewrite expressions.
//!
//! A template is literal text with `$(...)` placeholders:
//! `$(origin.path)`, `$(origin.query)`, `$(param.<name>)`, `$(header.<name>)`.
//! Templates are parsed once when an API enters the routing table and
//! rendered per request.

use axum::http::HeaderMap;
use thiserror::Error;

use crate::routing::matcher::PathParams;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RewriteError {
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
    #[error("unknown variable {0:?}")]
    UnknownVariable(String),
    #[error("empty name in variable {0:?}")]
    EmptyName(String),
    #[error("template must start with '/' or $(origin.path)")]
    NotAbsolute,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    OriginPath,
    OriginQuery,
    Param(String),
    Header(String),
}

/// Request values a template can reference.
pub struct RewriteInput<'a> {
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub params: &'a PathParams,
    pub headers: &'a HeaderMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RewriteTemplate {
    parts: Vec<Part>,
}

impl RewriteTemplate {
    pub fn parse(expr: &str) -> Result<Self, RewriteError> {
        let mut parts = Vec::new();
        let mut rest = expr;
        let mut offset = 0;

        while let Some(start) = rest.find("$(") {
            if start > 0 {
                parts.push(Part::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find(')')
                .ok_or(RewriteError::Unterminated(offset + start))?;
            parts.push(parse_variable(&after[..end])?);

            let consumed = start + 2 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }

        match parts.first() {
            Some(Part::Literal(text)) if text.starts_with('/') => {}
            Some(Part::OriginPath) => {}
            _ => return Err(RewriteError::NotAbsolute),
        }

        Ok(Self { parts })
    }

    /// Render the forwarded path (and query, if any).
    ///
    /// The original query string is appended unless the template already
    /// produced one.
    pub fn render(&self, input: &RewriteInput<'_>) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(text) => out.push_str(text),
                Part::OriginPath => out.push_str(input.path),
                Part::OriginQuery => out.push_str(input.query.unwrap_or_default()),
                Part::Param(name) => out.push_str(input.params.get(name).unwrap_or_default()),
                Part::Header(name) => out.push_str(
                    input
                        .headers
                        .get(name.as_str())
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default(),
                ),
            }
        }

        if !out.contains('?') {
            if let Some(query) = input.query.filter(|q| !q.is_empty()) {
                out.push('?');
                out.push_str(query);
            }
        }
        out
    }
}

fn parse_variable(var: &str) -> Result<Part, RewriteError> {
    match var {
        "origin.path" => return Ok(Part::OriginPath),
        "origin.query" => return Ok(Part::OriginQuery),
        _ => {}
    }

    let (namespace, name) = var
        .split_once('.')
        .ok_or_else(|| RewriteError::UnknownVariable(var.to_string()))?;
    if name.is_empty() {
        return Err(RewriteError::EmptyName(var.to_string()));
    }
    match namespace {
        "param" => Ok(Part::Param(name.to_string())),
        "header" => Ok(Part::Header(name.to_ascii_lowercase())),
        _ => Err(RewriteError::UnknownVariable(var.to_string())),
    }
}
