//! Error types for field and model operations

use thiserror::Error;

/// Result type for forms operations
pub type Result<T> = std::result::Result<T, FormsError>;

/// Errors that can occur in field and model operations.
///
/// A failed validation is not an error: it is stored as
/// [`Validation::Invalid`](crate::Validation::Invalid). These variants cover
/// validators that are themselves broken and definitions that cannot be built.
#[derive(Debug, Error)]
pub enum FormsError {
    /// A validator raised a signal that cannot be turned into an error descriptor
    #[error("validator failed: {reason}")]
    ValidatorFailed { reason: String },

    /// A definition referenced a validator that is not registered
    #[error("unknown validator: {name}")]
    UnknownValidator { name: String },

    /// A model definition could not be interpreted
    #[error("invalid definition: {message}")]
    InvalidDefinition { message: String },

    /// A pattern validator was given a malformed regular expression
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
