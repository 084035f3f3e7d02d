//! Route authorization matching
//!
//! Routes are declared as path patterns where `:name` segments match any
//! single path segment, e.g. `/api/users/:id`. The first declared
//! (pattern, method) pair that matches a request wins.

use regex::Regex;
use serde::Serialize;

use crate::config::RouteAccess;
use crate::error::{AccessError, Result};

/// A compiled (pattern, method) -> permissions rule
#[derive(Debug, Clone)]
pub struct RouteRule {
    pattern: String,
    method: String,
    permissions: Vec<String>,
    regex: Regex,
}

impl RouteRule {
    pub fn new(pattern: &str, method: &str, permissions: Vec<String>) -> Result<Self> {
        let method = method.trim().to_ascii_uppercase();
        if method.is_empty() {
            return Err(AccessError::Config(format!(
                "Route '{}' declares an empty method",
                pattern
            )));
        }

        Ok(Self {
            regex: compile_pattern(pattern)?,
            pattern: pattern.to_string(),
            method,
            permissions,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Permissions of which the caller must hold at least one
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    fn matches(&self, path: &str, method: &str) -> bool {
        self.method.eq_ignore_ascii_case(method) && self.regex.is_match(path)
    }
}

/// Serializable summary of a rule
#[derive(Debug, Clone, Serialize)]
pub struct RouteSummary {
    pub pattern: String,
    pub method: String,
    pub permissions: Vec<String>,
}

impl From<&RouteRule> for RouteSummary {
    fn from(rule: &RouteRule) -> Self {
        Self {
            pattern: rule.pattern.clone(),
            method: rule.method.clone(),
            permissions: rule.permissions.clone(),
        }
    }
}

/// Ordered set of route rules
#[derive(Debug, Clone, Default)]
pub struct RouteMatcher {
    rules: Vec<RouteRule>,
}

impl RouteMatcher {
    pub fn new(rules: Vec<RouteRule>) -> Self {
        Self { rules }
    }

    /// Compile every declared route, keeping declaration order
    pub fn from_config(routes: &RouteAccess) -> Result<Self> {
        let mut rules = Vec::new();
        for (pattern, methods) in routes {
            for (method, permissions) in methods {
                rules.push(RouteRule::new(pattern, method, permissions.clone())?);
            }
        }
        Ok(Self { rules })
    }

    /// First rule matching the request, ignoring any query string
    pub fn match_route(&self, path: &str, method: &str) -> Option<&RouteRule> {
        let path = path.split('?').next().unwrap_or(path);
        self.rules.iter().find(|rule| rule.matches(path, method))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    if !pattern.starts_with('/') {
        return Err(AccessError::Config(format!(
            "Route pattern must start with '/': {}",
            pattern
        )));
    }

    let mut regex = String::from("^");
    for (i, segment) in pattern.split('/').enumerate() {
        if i > 0 {
            regex.push('/');
        }
        match segment.strip_prefix(':') {
            Some("") => {
                return Err(AccessError::Config(format!(
                    "Unnamed parameter in route pattern: {}",
                    pattern
                )))
            }
            Some(_) => regex.push_str("[^/]+"),
            None => regex.push_str(&regex::escape(segment)),
        }
    }
    regex.push('$');

    Regex::new(&regex)
        .map_err(|e| AccessError::Config(format!("Invalid route pattern {}: {}", pattern, e)))
}
