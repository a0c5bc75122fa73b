//! Validation outcomes, validator signals and the validator seam.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FormsError, Result};
use crate::value::Value;

/// Message stored when a validator returns `false` without a reason.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Validation failed";

/// A single validation error descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// The outcome of the last validation run on a field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "errors", rename_all = "kebab-case")]
pub enum Validation {
    /// Never validated.
    #[default]
    Unvalidated,
    /// The last validation passed.
    Valid,
    /// The last validation failed with these errors.
    Invalid(Vec<ValidationError>),
}

impl Validation {
    pub fn is_valid(&self) -> Option<bool> {
        match self {
            Validation::Unvalidated => None,
            Validation::Valid => Some(true),
            Validation::Invalid(_) => Some(false),
        }
    }

    /// The stored errors; empty unless invalid.
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            Validation::Invalid(errors) => errors,
            _ => &[],
        }
    }

    /// Normalize a validator result into a stored outcome.
    ///
    /// Strings and error descriptors become `Invalid`. Null, undefined and
    /// faults are not representable and come back as `Err`.
    pub fn from_outcome(outcome: std::result::Result<bool, Rejection>) -> Result<Self> {
        match outcome {
            Ok(true) => Ok(Validation::Valid),
            Ok(false) => Ok(Validation::Invalid(vec![ValidationError::new(
                DEFAULT_FAILURE_MESSAGE,
            )])),
            Err(rejection) => rejection.into_errors().map(Validation::Invalid),
        }
    }
}

/// The signal a validator raises instead of returning a boolean.
#[derive(Debug)]
pub enum Rejection {
    /// A plain message. Stored as a single error.
    Message(String),
    /// A single error descriptor. Stored as-is.
    Error(ValidationError),
    /// Several error descriptors. Stored as-is when non-empty.
    Errors(Vec<ValidationError>),
    /// Raised null. Propagated to the caller.
    Null,
    /// Raised nothing. Propagated to the caller.
    Undefined,
    /// The validator itself broke. Propagated to the caller.
    Fault(Box<dyn std::error::Error + Send + Sync>),
}

impl Rejection {
    pub fn message(message: impl Into<String>) -> Self {
        Rejection::Message(message.into())
    }

    pub fn fault(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Rejection::Fault(err.into())
    }

    /// Whether this signal can be stored as validation errors.
    pub fn is_representable(&self) -> bool {
        match self {
            Rejection::Message(_) | Rejection::Error(_) => true,
            Rejection::Errors(errors) => !errors.is_empty(),
            Rejection::Null | Rejection::Undefined | Rejection::Fault(_) => false,
        }
    }

    fn into_errors(self) -> Result<Vec<ValidationError>> {
        match self {
            Rejection::Message(message) => Ok(vec![ValidationError::new(message)]),
            Rejection::Error(error) => Ok(vec![error]),
            Rejection::Errors(errors) if !errors.is_empty() => Ok(errors),
            Rejection::Errors(_) => Err(FormsError::ValidatorFailed {
                reason: "validator rejected with an empty error list".into(),
            }),
            Rejection::Null => Err(FormsError::ValidatorFailed {
                reason: "validator rejected with null".into(),
            }),
            Rejection::Undefined => Err(FormsError::ValidatorFailed {
                reason: "validator rejected without a value".into(),
            }),
            Rejection::Fault(err) => Err(FormsError::ValidatorFailed {
                reason: err.to_string(),
            }),
        }
    }
}

impl From<&str> for Rejection {
    fn from(message: &str) -> Self {
        Rejection::Message(message.to_string())
    }
}

impl From<String> for Rejection {
    fn from(message: String) -> Self {
        Rejection::Message(message)
    }
}

impl From<ValidationError> for Rejection {
    fn from(error: ValidationError) -> Self {
        Rejection::Error(error)
    }
}

/// An asynchronous check of a field value.
///
/// `Ok(true)` passes, `Ok(false)` fails with a generic message, and
/// `Err(rejection)` fails with the rejection's errors when it is
/// representable.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, value: &Value) -> std::result::Result<bool, Rejection>;
}

/// Adapter that lets an async closure act as a [`Validator`].
pub struct FnValidator<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Validator for FnValidator<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<bool, Rejection>> + Send,
{
    async fn validate(&self, value: &Value) -> std::result::Result<bool, Rejection> {
        (self.f)(value.clone()).await
    }
}

/// Wrap an async closure as a shareable validator.
///
/// ```rust,ignore
/// let validator = validator_fn(|v: Value| async move { Ok(v.as_str() == Some("ok")) });
/// ```
pub fn validator_fn<F, Fut>(f: F) -> Arc<dyn Validator>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<bool, Rejection>> + Send + 'static,
{
    Arc::new(FnValidator { f })
}

/// Options accepted by `validate`.
///
/// `bool` converts to `skip_empty`, so `validate(true)` skips empty values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidateOptions {
    /// Re-run validation even when a settled outcome exists.
    pub force: bool,
    /// Do not invoke the validator when the value is empty.
    pub skip_empty: bool,
}

impl ValidateOptions {
    pub fn force() -> Self {
        Self {
            force: true,
            skip_empty: false,
        }
    }

    pub fn skip_empty() -> Self {
        Self {
            force: false,
            skip_empty: true,
        }
    }
}

impl From<bool> for ValidateOptions {
    fn from(skip_empty: bool) -> Self {
        Self {
            force: false,
            skip_empty,
        }
    }
}

impl From<()> for ValidateOptions {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_true_and_false() {
        assert_eq!(Validation::from_outcome(Ok(true)).unwrap(), Validation::Valid);
        let failed = Validation::from_outcome(Ok(false)).unwrap();
        assert_eq!(failed.is_valid(), Some(false));
        assert_eq!(failed.errors()[0].message, DEFAULT_FAILURE_MESSAGE);
    }

    #[test]
    fn representable_rejections_are_stored() {
        let v = Validation::from_outcome(Err("too short".into())).unwrap();
        assert_eq!(v.errors(), &[ValidationError::new("too short")]);

        let descriptor = ValidationError::new("bad").with_code("format");
        let v = Validation::from_outcome(Err(descriptor.clone().into())).unwrap();
        assert_eq!(v.errors(), &[descriptor]);
    }

    #[test]
    fn unrepresentable_rejections_propagate() {
        for rejection in [
            Rejection::Null,
            Rejection::Undefined,
            Rejection::Errors(vec![]),
            Rejection::fault("connection reset"),
        ] {
            assert!(!rejection.is_representable());
            let err = Validation::from_outcome(Err(rejection)).unwrap_err();
            assert!(matches!(err, FormsError::ValidatorFailed { .. }));
        }
    }

    #[test]
    fn options_from_legacy_bool() {
        assert_eq!(ValidateOptions::from(true), ValidateOptions::skip_empty());
        assert_eq!(ValidateOptions::from(false), ValidateOptions::default());
        assert_eq!(ValidateOptions::from(()), ValidateOptions::default());
    }

    #[test]
    fn derived_validity() {
        assert_eq!(Validation::Unvalidated.is_valid(), None);
        assert_eq!(Validation::Valid.is_valid(), Some(true));
        assert!(Validation::Valid.errors().is_empty());
    }

    #[tokio::test]
    async fn closure_validator() {
        let validator = validator_fn(|v: Value| async move { Ok(v.as_str() == Some("ok")) });
        assert!(validator.validate(&Value::from("ok")).await.unwrap());
        assert!(!validator.validate(&Value::from("no")).await.unwrap());
    }
}
