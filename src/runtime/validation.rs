//! Validation gate invoked before every commit.
//!
//! # Responsibilities
//! - Define the `Validator` collaborator contract
//! - Carry structured errors and warnings back to callers
//! - Provide a rule-based validator for common path checks
//!
//! # Design Decisions
//! - Validators see the fully merged candidate, never the partial update
//! - A failing validation is data (`ValidationResult`), not an error
//! - Warnings never block a commit

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::merge::get_path;

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Outcome of validating a candidate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn from_issues(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// One-line rendering of all errors.
    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            return "valid".to_string();
        }
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Collaborator that checks a merged configuration before it is committed.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, config: &Value) -> ValidationResult;
}

#[async_trait]
impl<F> Validator for F
where
    F: Fn(&Value) -> ValidationResult + Send + Sync,
{
    async fn validate(&self, config: &Value) -> ValidationResult {
        self(config)
    }
}

/// JSON type expected at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Object,
    Array,
    String,
    Number,
    Bool,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ValueKind::Object => value.is_object(),
            ValueKind::Array => value.is_array(),
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Bool => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone)]
enum Rule {
    Required(String),
    Kind(String, ValueKind),
    Range { path: String, min: f64, max: f64 },
    OneOf(String, Vec<String>),
    Deprecated(String, String),
}

/// Validator built from declarative path rules.
///
/// ```
/// use live_config::runtime::validation::{RuleValidator, ValueKind};
///
/// let validator = RuleValidator::new()
///     .require("server.name")
///     .kind("server.port", ValueKind::Number)
///     .range("server.port", 1.0, 65535.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RuleValidator {
    rules: Vec<Rule>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The path must be present and not null.
    pub fn require(mut self, path: impl Into<String>) -> Self {
        self.rules.push(Rule::Required(path.into()));
        self
    }

    /// When present, the value at `path` must have the given kind.
    pub fn kind(mut self, path: impl Into<String>, kind: ValueKind) -> Self {
        self.rules.push(Rule::Kind(path.into(), kind));
        self
    }

    /// When present, the number at `path` must lie in `[min, max]`.
    pub fn range(mut self, path: impl Into<String>, min: f64, max: f64) -> Self {
        self.rules.push(Rule::Range {
            path: path.into(),
            min,
            max,
        });
        self
    }

    /// When present, the string at `path` must be one of `allowed`.
    pub fn one_of<I, S>(mut self, path: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(Rule::OneOf(
            path.into(),
            allowed.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Presence of `path` produces a warning with `hint`.
    pub fn deprecated(mut self, path: impl Into<String>, hint: impl Into<String>) -> Self {
        self.rules.push(Rule::Deprecated(path.into(), hint.into()));
        self
    }

    /// Run every rule synchronously.
    pub fn check(&self, config: &Value) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !config.is_object() {
            errors.push(ValidationIssue::new("", "configuration root must be an object"));
        }

        for rule in &self.rules {
            match rule {
                Rule::Required(path) => {
                    if get_path(config, path).map_or(true, Value::is_null) {
                        errors.push(ValidationIssue::new(path, "is required"));
                    }
                }
                Rule::Kind(path, kind) => {
                    if let Some(value) = get_path(config, path) {
                        if !kind.matches(value) {
                            errors.push(ValidationIssue::new(path, format!("must be of type {kind:?}")));
                        }
                    }
                }
                Rule::Range { path, min, max } => {
                    if let Some(value) = get_path(config, path) {
                        match value.as_f64() {
                            Some(n) if n < *min || n > *max => errors.push(ValidationIssue::new(
                                path,
                                format!("must be between {min} and {max}"),
                            )),
                            Some(_) => {}
                            None => errors.push(ValidationIssue::new(path, "must be a number")),
                        }
                    }
                }
                Rule::OneOf(path, allowed) => {
                    if let Some(value) = get_path(config, path) {
                        let ok = value.as_str().is_some_and(|s| allowed.iter().any(|a| a == s));
                        if !ok {
                            errors.push(ValidationIssue::new(
                                path,
                                format!("must be one of [{}]", allowed.join(", ")),
                            ));
                        }
                    }
                }
                Rule::Deprecated(path, hint) => {
                    if get_path(config, path).is_some() {
                        warnings.push(ValidationIssue::new(path, format!("is deprecated: {hint}")));
                    }
                }
            }
        }

        ValidationResult::from_issues(errors, warnings)
    }
}

#[async_trait]
impl Validator for RuleValidator {
    async fn validate(&self, config: &Value) -> ValidationResult {
        self.check(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rules_collect_all_errors() {
        let validator = RuleValidator::new()
            .require("server.name")
            .kind("server.port", ValueKind::Number)
            .range("server.workers", 1.0, 64.0)
            .one_of("log.level", ["debug", "info"]);

        let result = validator.check(&json!({
            "server": {"port": "80", "workers": 128},
            "log": {"level": "loud"}
        }));
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 4);
        assert!(result.summary().contains("server.name: is required"));
    }

    #[test]
    fn test_warnings_do_not_block() {
        let validator = RuleValidator::new().deprecated("legacy", "use modern instead");
        let result = validator.check(&json!({"legacy": true}));
        assert!(result.is_valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_root_must_be_object() {
        let result = RuleValidator::new().check(&json!([1, 2]));
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_closure_validator() {
        let validator = |config: &Value| {
            if config.get("forbidden").is_some() {
                ValidationResult::from_issues(vec![ValidationIssue::new("forbidden", "not allowed")], vec![])
            } else {
                ValidationResult::valid()
            }
        };
        assert!(validator.validate(&json!({})).await.is_valid);
        assert!(!validator.validate(&json!({"forbidden": 1})).await.is_valid);
    }
}
