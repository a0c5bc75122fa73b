//! Reactive field and model state tracking
//!
//! `swissarmyhammer-forms` tracks editable values the way a form does: each
//! [`Field`] holds a value, a clean baseline and the outcome of its last
//! validation, and each [`Model`] composes named fields (and nested models)
//! into one aggregate dirty/valid status.
//!
//! # Architecture
//!
//! - **Blueprints**: [`define_field`] and [`define_model`] declare shapes once;
//!   `instantiate()` creates independent live state
//! - **Derived state**: dirty and valid flags are computed from values and
//!   outcomes, never cached
//! - **Edge-triggered events**: `validChange` and `modifiedChange` fire only
//!   when the observed state actually changes
//! - **Async validators**: opaque [`Validator`]s return a boolean or raise a
//!   [`Rejection`]; broken validators surface as errors
//!
//! ```rust,ignore
//! let model = define_model(
//!     ModelDeclaration::new()
//!         .field("title", FieldConfig::new().validator(Arc::new(Required)))
//!         .value("tags", Value::Array(vec![])),
//! )
//! .instantiate();
//!
//! model.field("title").unwrap().set_value("Write docs");
//! assert!(model.is_dirty());
//! assert_eq!(model.validate(()).await?, Some(true));
//! model.sync().await;
//! ```

pub mod definition;
pub mod error;
pub mod events;
pub mod field;
pub mod model;
pub mod validation;
pub mod validators;
pub mod value;

pub use definition::{EntryDefinition, FieldDefinition, ModelDefinition};
pub use error::{FormsError, Result};
pub use events::{Event, EventEmitter, EventKind, Subscription};
pub use field::{define_field, DefaultValue, Field, FieldBlueprint, FieldConfig, FieldSource};
pub use model::{
    aggregate_valid, define_model, resolve_declaration, Blueprint, Entry, Member,
    MemberValidation, Model, ModelBlueprint, ModelDeclaration, ModelSource,
};
pub use validation::{
    validator_fn, Rejection, ValidateOptions, Validation, ValidationError, Validator,
};
pub use validators::{Length, Pattern, Required, ValidatorRegistry};
pub use value::Value;
