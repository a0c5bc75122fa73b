//! Built-in validators and a name-keyed registry for them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{FormsError, Result};
use crate::validation::{Rejection, ValidationError, Validator};
use crate::value::Value;

/// Fails when the value is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct Required;

#[async_trait]
impl Validator for Required {
    async fn validate(&self, value: &Value) -> std::result::Result<bool, Rejection> {
        if value.is_empty() {
            return Err(ValidationError::new("value is required")
                .with_code("required")
                .into());
        }
        Ok(true)
    }
}

/// Fails when a string does not match a regular expression.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: Regex::new(pattern)?,
        })
    }
}

#[async_trait]
impl Validator for Pattern {
    async fn validate(&self, value: &Value) -> std::result::Result<bool, Rejection> {
        let Some(text) = value.as_str() else {
            return Err(ValidationError::new("expected text").with_code("type").into());
        };
        if !self.regex.is_match(text) {
            return Err(ValidationError::new(format!(
                "does not match pattern {}",
                self.regex.as_str()
            ))
            .with_code("pattern")
            .into());
        }
        Ok(true)
    }
}

/// Bounds the length of a string, array or map.
#[derive(Debug, Clone, Copy, Default)]
pub struct Length {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

#[async_trait]
impl Validator for Length {
    async fn validate(&self, value: &Value) -> std::result::Result<bool, Rejection> {
        let Some(len) = value.len() else {
            return Err(ValidationError::new("value has no length")
                .with_code("type")
                .into());
        };
        if let Some(min) = self.min.filter(|&min| len < min) {
            return Err(ValidationError::new(format!("must have at least {min} items"))
                .with_code("min-length")
                .into());
        }
        if let Some(max) = self.max.filter(|&max| len > max) {
            return Err(ValidationError::new(format!("must have at most {max} items"))
                .with_code("max-length")
                .into());
        }
        Ok(true)
    }
}

/// Validators addressable by name, used by YAML definitions.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `required` pre-registered.
    pub fn with_builtins() -> Self {
        Self::new().with("required", Arc::new(Required))
    }

    pub fn with(mut self, name: impl Into<String>, validator: Arc<dyn Validator>) -> Self {
        self.register(name, validator);
        self
    }

    /// Register a validator, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, validator: Arc<dyn Validator>) {
        self.validators.insert(name.into(), validator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Validator>> {
        self.validators.get(name).cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is an error.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Validator>> {
        self.get(name).ok_or_else(|| FormsError::UnknownValidator {
            name: name.to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn errors(outcome: std::result::Result<bool, Rejection>) -> Option<String> {
        match outcome {
            Ok(_) => None,
            Err(Rejection::Error(e)) => e.code,
            Err(other) => panic!("unexpected rejection {other:?}"),
        }
    }

    #[tokio::test]
    async fn required_rejects_empty() {
        assert_eq!(errors(Required.validate(&Value::from("")).await), Some("required".into()));
        assert_eq!(errors(Required.validate(&Value::Null).await), Some("required".into()));
        assert!(Required.validate(&Value::from("x")).await.unwrap());
    }

    #[tokio::test]
    async fn pattern_matches_strings() {
        let pattern = Pattern::new(r"^\d{3}$").unwrap();
        assert!(pattern.validate(&Value::from("123")).await.unwrap());
        assert_eq!(errors(pattern.validate(&Value::from("12")).await), Some("pattern".into()));
        assert_eq!(errors(pattern.validate(&Value::from(12)).await), Some("type".into()));
    }

    #[test]
    fn pattern_rejects_bad_regex() {
        assert!(matches!(Pattern::new("(").unwrap_err(), FormsError::InvalidPattern(_)));
    }

    #[tokio::test]
    async fn length_bounds() {
        let length = Length {
            min: Some(1),
            max: Some(2),
        };
        assert!(length.validate(&Value::from(vec![1])).await.unwrap());
        assert_eq!(
            errors(length.validate(&Value::Array(vec![])).await),
            Some("min-length".into())
        );
        assert_eq!(
            errors(length.validate(&Value::from("abc")).await),
            Some("max-length".into())
        );
        assert_eq!(errors(length.validate(&Value::from(true)).await), Some("type".into()));
    }

    #[test]
    fn registry_lookup() {
        let registry =
            ValidatorRegistry::with_builtins().with("digits", Arc::new(Length::default()));
        assert!(registry.contains("required"));
        assert!(registry.get("digits").is_some());
        assert!(matches!(
            registry.resolve("email"),
            Err(FormsError::UnknownValidator { name }) if name == "email"
        ));
    }
}
