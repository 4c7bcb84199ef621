//! Runtime (compiled) forms of routing metadata.
//!
//! APIs and plugins are compiled once when their event is applied, so the
//! request path only runs prepared matchers, templates and regexes.

use std::sync::Arc;

use regex::Regex;

use crate::meta::validation::ValidationError;
use crate::meta::{Api, Parameter, Plugin, RuleType, Status};
use crate::routing::matcher::{method_matches, PathParams, UrlPattern};
use crate::routing::rewrite::RewriteTemplate;
use crate::script::ScriptPlugin;

/// Parameter validation with compiled rules.
#[derive(Debug, Clone)]
pub struct CompiledValidation {
    pub parameter: Parameter,
    pub required: bool,
    pub rules: Vec<Regex>,
}

/// One compiled dispatch node.
#[derive(Debug, Clone)]
pub struct NodeRuntime {
    pub cluster_id: u64,
    pub rewrite: Option<RewriteTemplate>,
    pub validations: Vec<CompiledValidation>,
}

/// An API ready for matching.
#[derive(Debug, Clone)]
pub struct ApiRuntime {
    pub meta: Api,
    pub pattern: UrlPattern,
    pub nodes: Vec<NodeRuntime>,
}

impl ApiRuntime {
    /// Compile the pattern, rewrite templates and validation rules of an API.
    pub fn compile(api: &Api) -> Result<Self, ValidationError> {
        let pattern = UrlPattern::parse(&api.url_pattern).map_err(|e| ValidationError::UrlPattern {
            pattern: api.url_pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut nodes = Vec::with_capacity(api.nodes.len());
        for (index, node) in api.nodes.iter().enumerate() {
            let rewrite = match node.url_rewrite.as_deref().filter(|e| !e.is_empty()) {
                Some(expr) => Some(RewriteTemplate::parse(expr).map_err(|e| {
                    ValidationError::UrlRewrite {
                        node: index,
                        expr: expr.to_string(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };

            let mut validations = Vec::with_capacity(node.validations.len());
            for validation in &node.validations {
                let mut rules = Vec::with_capacity(validation.rules.len());
                for rule in &validation.rules {
                    match rule.rule_type {
                        RuleType::Regexp => {
                            let regex = Regex::new(&rule.expression).map_err(|e| {
                                ValidationError::Expression {
                                    parameter: validation.parameter.name.clone(),
                                    expr: rule.expression.clone(),
                                    reason: e.to_string(),
                                }
                            })?;
                            rules.push(regex);
                        }
                    }
                }
                validations.push(CompiledValidation {
                    parameter: validation.parameter.clone(),
                    required: validation.required,
                    rules,
                });
            }

            nodes.push(NodeRuntime {
                cluster_id: node.cluster_id,
                rewrite,
                validations,
            });
        }

        Ok(Self {
            meta: api.clone(),
            pattern,
            nodes,
        })
    }

    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// The node requests are forwarded to by default.
    pub fn default_node(&self) -> Option<&NodeRuntime> {
        self.nodes.first()
    }

    /// Match method and path; Down APIs never match.
    pub fn matches(&self, method: &str, path: &str) -> Option<PathParams> {
        if self.meta.status != Status::Up || !method_matches(&self.meta.method, method) {
            return None;
        }
        self.pattern.matches(path)
    }
}

/// A plugin with its compiled script.
#[derive(Debug, Clone)]
pub struct CompiledPlugin {
    pub meta: Plugin,
    pub script: Arc<dyn ScriptPlugin>,
}
