//! API URL pattern matching.
//!
//! # Responsibilities
//! - Compile `url_pattern` strings into segment matchers
//! - Match request paths and capture path values
//! - Provide a total precedence order between overlapping patterns
//!
//! # Design Decisions
//! - Segments: literal, `{name}` (one segment), trailing `*` (any remainder)
//! - Literal matching is case-sensitive, method matching is not
//! - No regex in the hot path
//! - Most specific pattern wins; ties broken by API id (see `Specificity`)

use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatternError {
    #[error("pattern must start with '/'")]
    NotAbsolute,
    #[error("empty parameter name in segment {0}")]
    EmptyParam(usize),
    #[error("wildcard is only allowed as the last segment")]
    WildcardNotLast,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// Values captured from `{name}` segments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// How specific a pattern is; greater sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specificity {
    literals: usize,
    segments: usize,
    wildcard: bool,
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.literals
            .cmp(&other.literals)
            .then(self.segments.cmp(&other.segments))
            // a pattern without a trailing wildcard is more specific
            .then(other.wildcard.cmp(&self.wildcard))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A compiled URL pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlPattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        if !raw.starts_with('/') {
            return Err(PatternError::NotAbsolute);
        }

        let parts: Vec<&str> = split_path(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            let segment = if *part == "*" {
                if index + 1 != parts.len() {
                    return Err(PatternError::WildcardNotLast);
                }
                Segment::Wildcard
            } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                if name.is_empty() {
                    return Err(PatternError::EmptyParam(index));
                }
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn specificity(&self) -> Specificity {
        Specificity {
            literals: self
                .segments
                .iter()
                .filter(|s| matches!(s, Segment::Literal(_)))
                .count(),
            segments: self.segments.len(),
            wildcard: matches!(self.segments.last(), Some(Segment::Wildcard)),
        }
    }

    /// Match a request path, returning captured path values on success.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let mut params = Vec::new();
        let mut parts = split_path(path);

        for segment in &self.segments {
            match segment {
                Segment::Wildcard => return Some(PathParams(params)),
                Segment::Literal(expected) => {
                    if parts.next()? != expected {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.next()?;
                    params.push((name.clone(), value.to_string()));
                }
            }
        }

        if parts.next().is_some() {
            return None;
        }
        Some(PathParams(params))
    }
}

/// True if an API's configured method accepts the request method.
pub fn method_matches(configured: &str, method: &str) -> bool {
    configured == "*" || configured.eq_ignore_ascii_case(method)
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
