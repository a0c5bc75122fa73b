//! Field blueprints and live field instances.
//!
//! A [`FieldBlueprint`] is declared once and shared. Each
//! [`FieldBlueprint::instantiate`] call creates an independent [`Field`] with
//! its own value, baseline and validation outcome.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{Event, EventEmitter, EventKind, Subscription};
use crate::model::Member;
use crate::validation::{ValidateOptions, Validation, Validator};
use crate::value::Value;

/// How a field's default value is produced.
#[derive(Clone)]
pub enum DefaultValue {
    /// A fixed value, deep-cloned for every instance.
    Fixed(Value),
    /// A factory invoked once per instance and once per reset.
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
    pub fn resolve(&self) -> Value {
        match self {
            DefaultValue::Fixed(value) => value.clone(),
            DefaultValue::Factory(factory) => factory(),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Fixed(value) => f.debug_tuple("Fixed").field(value).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// Configuration for a single field.
#[derive(Clone, Default)]
pub struct FieldConfig {
    value: Option<Value>,
    default: Option<DefaultValue>,
    validator: Option<Arc<dyn Validator>>,
}

impl FieldConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit initial value. Takes precedence over any default.
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Fixed default value.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(DefaultValue::Fixed(value.into()));
        self
    }

    /// Default value produced by a factory on each instantiation.
    pub fn default_with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Factory(Arc::new(factory)));
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Resolve the value a fresh instance starts with.
    fn initial_value(&self) -> Value {
        if let Some(value) = &self.value {
            return value.clone();
        }
        self.default
            .as_ref()
            .map(DefaultValue::resolve)
            .unwrap_or_default()
    }
}

impl fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConfig")
            .field("value", &self.value)
            .field("default", &self.default)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

struct FieldShape {
    name: String,
    config: FieldConfig,
}

/// A reusable, immutable field declaration.
#[derive(Clone)]
pub struct FieldBlueprint {
    shape: Arc<FieldShape>,
}

impl FieldBlueprint {
    pub fn name(&self) -> &str {
        &self.shape.name
    }

    pub fn has_validator(&self) -> bool {
        self.shape.config.validator.is_some()
    }

    /// Whether two handles refer to the same declaration.
    pub fn ptr_eq(&self, other: &FieldBlueprint) -> bool {
        Arc::ptr_eq(&self.shape, &other.shape)
    }

    /// Create a new, independent field instance.
    pub fn instantiate(&self) -> Field {
        let value = self.shape.config.initial_value();
        let baseline = value.clone();
        Field {
            inner: Arc::new(FieldInner {
                blueprint: self.clone(),
                state: Mutex::new(FieldState {
                    value,
                    baseline,
                    validation: Validation::Unvalidated,
                    validating: false,
                    last_dirty: false,
                }),
                lifecycle: tokio::sync::Mutex::new(()),
                events: EventEmitter::new(),
            }),
        }
    }
}

impl fmt::Debug for FieldBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldBlueprint")
            .field("name", &self.shape.name)
            .field("config", &self.shape.config)
            .finish()
    }
}

/// What [`define_field`] builds a blueprint from.
pub enum FieldSource {
    Config(FieldConfig),
    Blueprint(FieldBlueprint),
}

impl From<FieldConfig> for FieldSource {
    fn from(config: FieldConfig) -> Self {
        FieldSource::Config(config)
    }
}

impl From<FieldBlueprint> for FieldSource {
    fn from(blueprint: FieldBlueprint) -> Self {
        FieldSource::Blueprint(blueprint)
    }
}

/// Declare a field. An existing blueprint is returned unchanged.
pub fn define_field(name: impl Into<String>, source: impl Into<FieldSource>) -> FieldBlueprint {
    match source.into() {
        FieldSource::Blueprint(blueprint) => blueprint,
        FieldSource::Config(config) => FieldBlueprint {
            shape: Arc::new(FieldShape {
                name: name.into(),
                config,
            }),
        },
    }
}

struct FieldState {
    value: Value,
    baseline: Value,
    validation: Validation,
    validating: bool,
    /// Dirty flag as of the last change notification.
    last_dirty: bool,
}

impl FieldState {
    fn is_dirty(&self) -> bool {
        self.value != self.baseline
    }
}

struct FieldInner {
    blueprint: FieldBlueprint,
    state: Mutex<FieldState>,
    /// Serializes validate and sync on one instance.
    lifecycle: tokio::sync::Mutex<()>,
    events: EventEmitter,
}

/// A live field: a value, its clean baseline and its validation outcome.
///
/// `Field` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct Field {
    inner: Arc<FieldInner>,
}

impl Field {
    pub fn name(&self) -> &str {
        self.inner.blueprint.name()
    }

    pub fn blueprint(&self) -> &FieldBlueprint {
        &self.inner.blueprint
    }

    /// A deep copy of the current value.
    pub fn value(&self) -> Value {
        self.state().value.clone()
    }

    /// Read the current value without copying it.
    pub fn with_value<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.state().value)
    }

    /// Replace the value.
    pub fn set_value(&self, value: impl Into<Value>) {
        let value = value.into();
        self.commit(|state| state.value = value);
    }

    /// Mutate the value in place. The mutation is seen by dirty checking.
    pub fn update<R>(&self, f: impl FnOnce(&mut Value) -> R) -> R {
        self.commit(|state| f(&mut state.value))
    }

    pub fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    pub fn validation(&self) -> Validation {
        self.state().validation.clone()
    }

    pub fn is_valid(&self) -> Option<bool> {
        self.state().validation.is_valid()
    }

    /// Whether a validation run is in flight.
    pub fn is_validating(&self) -> bool {
        self.state().validating
    }

    /// Commit the current value as the new clean baseline.
    pub async fn sync(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.commit(|state| state.baseline = state.value.clone());
        debug!(field = self.name(), "synced");
    }

    /// Restore the default value and make it the baseline. Validation is kept.
    pub fn reset(&self) {
        let value = self.inner.blueprint.shape.config.initial_value();
        self.commit(|state| {
            state.baseline = value.clone();
            state.value = value;
        });
        debug!(field = self.name(), "reset");
    }

    /// Run the validator against the current value.
    ///
    /// Returns `Ok(None)` when skip-empty applies and the value is empty; the
    /// stored outcome is left untouched then. A validator signal that cannot be
    /// stored as errors is returned as `Err` and also leaves it untouched.
    pub async fn validate(
        &self,
        options: impl Into<ValidateOptions>,
    ) -> Result<Option<Validation>> {
        let options = options.into();
        let _lifecycle = self.inner.lifecycle.lock().await;

        let value = {
            let state = self.state();
            if options.skip_empty && state.value.is_empty() {
                debug!(field = self.name(), "skipping validation of empty value");
                return Ok(None);
            }
            state.value.clone()
        };

        let next = match &self.inner.blueprint.shape.config.validator {
            None => Validation::Valid,
            Some(validator) => {
                self.state().validating = true;
                let _validating = scopeguard::guard((), |_| self.state().validating = false);
                match Validation::from_outcome(validator.validate(&value).await) {
                    Ok(next) => next,
                    Err(err) => {
                        warn!(field = self.name(), %err, "validator failed");
                        return Err(err);
                    }
                }
            }
        };

        let changed = {
            let mut state = self.state();
            let previous = std::mem::replace(&mut state.validation, next.clone());
            previous != next
        };
        debug!(
            field = self.name(),
            valid = ?next.is_valid(),
            errors = next.errors().len(),
            changed,
            "validated"
        );
        if changed {
            self.inner.events.emit(&Event::ValidChange {
                valid: next.is_valid(),
                source: Member::Field(self.clone()),
            });
        }
        Ok(Some(next))
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        self.inner.events.off(subscription)
    }

    /// Whether two handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Field) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> MutexGuard<'_, FieldState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a state change, then emit `ModifiedChange` if the dirty flag flipped.
    fn commit<R>(&self, f: impl FnOnce(&mut FieldState) -> R) -> R {
        let (result, flipped) = {
            let mut state = self.state();
            let result = f(&mut state);
            let dirty = state.is_dirty();
            let flipped = (dirty != state.last_dirty).then_some(dirty);
            state.last_dirty = dirty;
            (result, flipped)
        };
        if let Some(dirty) = flipped {
            self.inner.events.emit(&Event::ModifiedChange {
                dirty,
                source: Member::Field(self.clone()),
            });
        }
        result
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Field")
            .field("name", &self.name())
            .field("value", &state.value)
            .field("dirty", &state.is_dirty())
            .field("validation", &state.validation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{validator_fn, Rejection, ValidationError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_validator(
        calls: &Arc<AtomicUsize>,
        check: fn(&Value) -> std::result::Result<bool, Rejection>,
    ) -> Arc<dyn Validator> {
        let calls = Arc::clone(calls);
        validator_fn(move |v: Value| {
            calls.fetch_add(1, Ordering::SeqCst);
            let outcome = check(&v);
            async move { outcome }
        })
    }

    fn count_events(field: &Field, kind: EventKind) -> Arc<Mutex<Vec<Event>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        field.on(kind, move |e| sink.lock().unwrap().push(e.clone()));
        seen
    }

    #[test]
    fn initial_value_resolution() {
        let explicit = define_field("a", FieldConfig::new().value(1).default_value(2));
        assert_eq!(explicit.instantiate().value(), Value::Int(1));

        let fixed = define_field("b", FieldConfig::new().default_value("x"));
        assert_eq!(fixed.instantiate().value(), Value::from("x"));

        let factory = define_field("c", FieldConfig::new().default_with(|| Value::from(7)));
        assert_eq!(factory.instantiate().value(), Value::Int(7));

        let bare = define_field("d", FieldConfig::new());
        let field = bare.instantiate();
        assert!(field.value().is_undefined());
        assert!(!field.is_dirty());
        assert_eq!(field.validation(), Validation::Unvalidated);
        assert_eq!(field.is_valid(), None);
    }

    #[test]
    fn factory_defaults_are_not_shared() {
        let blueprint = define_field("x", FieldConfig::new().default_with(|| Value::Array(vec![])));
        let a = blueprint.instantiate();
        let b = blueprint.instantiate();

        a.update(|v| v.as_array_mut().unwrap().push(Value::from(1)));
        assert_eq!(a.value().len(), Some(1));
        assert_eq!(b.value().len(), Some(0));
    }

    #[test]
    fn fixed_defaults_are_not_shared() {
        let blueprint = define_field("x", FieldConfig::new().default_value(vec![1]));
        let a = blueprint.instantiate();
        let b = blueprint.instantiate();

        a.update(|v| v.as_array_mut().unwrap().clear());
        assert_eq!(b.value().len(), Some(1));
    }

    #[test]
    fn define_field_reuses_blueprint() {
        let blueprint = define_field("x", FieldConfig::new());
        let again = define_field("ignored", blueprint.clone());
        assert!(again.ptr_eq(&blueprint));
        assert_eq!(again.name(), "x");

        let other = define_field("x", FieldConfig::new());
        assert!(!other.ptr_eq(&blueprint));
    }

    #[tokio::test]
    async fn in_place_mutation_is_dirty_until_sync() {
        let field = define_field("tags", FieldConfig::new().default_value(Value::Array(vec![])))
            .instantiate();
        field.update(|v| v.as_array_mut().unwrap().push(Value::from("a")));
        assert!(field.is_dirty());

        field.sync().await;
        assert!(!field.is_dirty());

        // The baseline is a copy: mutating the value again dirties it.
        field.update(|v| v.as_array_mut().unwrap().push(Value::from("b")));
        assert!(field.is_dirty());
        field.update(|v| {
            v.as_array_mut().unwrap().pop();
        });
        assert!(!field.is_dirty());
    }

    #[tokio::test]
    async fn reset_restores_default_and_keeps_validation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = define_field(
            "tags",
            FieldConfig::new()
                .default_with(|| Value::Array(vec![]))
                .validator(counting_validator(&calls, |_| Ok(false))),
        )
        .instantiate();

        field.update(|v| v.as_array_mut().unwrap().push(Value::from(1)));
        field.sync().await;
        field.update(|v| v.as_array_mut().unwrap().push(Value::from(2)));
        field.validate(()).await.unwrap();

        field.reset();
        assert!(!field.is_dirty());
        assert_eq!(field.value(), Value::Array(vec![]));
        assert_eq!(field.is_valid(), Some(false));
    }

    #[tokio::test]
    async fn validate_stores_outcomes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = define_field(
            "f",
            FieldConfig::new().validator(counting_validator(&calls, |v| {
                Ok(v.as_str() == Some("ok"))
            })),
        )
        .instantiate();

        field.set_value("bad");
        let outcome = field.validate(()).await.unwrap().unwrap();
        assert_eq!(outcome.errors()[0].message, "Validation failed");
        assert_eq!(field.is_valid(), Some(false));

        field.set_value("ok");
        assert_eq!(field.validate(()).await.unwrap(), Some(Validation::Valid));
        assert_eq!(field.is_valid(), Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn field_without_validator_is_valid() {
        let field = define_field("f", FieldConfig::new()).instantiate();
        field.validate(()).await.unwrap();
        assert_eq!(field.is_valid(), Some(true));
    }

    #[tokio::test]
    async fn skip_empty_does_not_invoke_validator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = define_field(
            "f",
            FieldConfig::new().validator(counting_validator(&calls, |_| Ok(true))),
        )
        .instantiate();

        for empty in [Value::Undefined, Value::Null, Value::from(""), Value::Array(vec![])] {
            field.set_value(empty);
            assert_eq!(field.validate(true).await.unwrap(), None);
            assert_eq!(field.validate(ValidateOptions::skip_empty()).await.unwrap(), None);
            assert_eq!(field.is_valid(), None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        field.set_value("x");
        assert_eq!(field.validate(true).await.unwrap(), Some(Validation::Valid));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skip_empty_keeps_previous_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = define_field(
            "f",
            FieldConfig::new().validator(counting_validator(&calls, |_| Err("nope".into()))),
        )
        .instantiate();

        field.set_value("x");
        field.validate(()).await.unwrap();
        field.set_value("");
        assert_eq!(field.validate(true).await.unwrap(), None);
        assert_eq!(field.is_valid(), Some(false));
    }

    #[tokio::test]
    async fn identical_rejection_emits_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let field = define_field(
            "f",
            FieldConfig::new().validator(counting_validator(&calls, |_| Err("always".into()))),
        )
        .instantiate();
        let seen = count_events(&field, EventKind::ValidChange);

        field.validate(()).await.unwrap();
        field.validate(()).await.unwrap();
        assert_eq!(field.is_valid(), Some(false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn different_errors_emit_again() {
        let field = define_field(
            "f",
            FieldConfig::new().validator(validator_fn(|v: Value| async move {
                Err(Rejection::Error(ValidationError::new(format!(
                    "bad value {}",
                    v.as_str().unwrap_or_default()
                ))))
            })),
        )
        .instantiate();
        let seen = count_events(&field, EventKind::ValidChange);

        field.set_value("a");
        field.validate(()).await.unwrap();
        field.set_value("b");
        field.validate(()).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(field.validation().errors()[0].message, "bad value b");
    }

    #[tokio::test]
    async fn unrepresentable_rejection_propagates() {
        let field = define_field(
            "f",
            FieldConfig::new().validator(validator_fn(|_: Value| async { Err(Rejection::Null) })),
        )
        .instantiate();
        let seen = count_events(&field, EventKind::ValidChange);

        let err = field.validate(()).await.unwrap_err();
        assert!(err.to_string().contains("null"));
        assert_eq!(field.validation(), Validation::Unvalidated);
        assert!(!field.is_validating());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn modified_change_is_edge_triggered() {
        let field = define_field("f", FieldConfig::new().default_value("a")).instantiate();
        let seen = count_events(&field, EventKind::ModifiedChange);

        field.set_value("b");
        field.set_value("c");
        field.set_value("a");
        field.set_value("d");
        field.sync().await;
        field.sync().await;

        let flags: Vec<bool> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| match e {
                Event::ModifiedChange { dirty, .. } => *dirty,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn sync_waits_for_inflight_validation() {
        let field = define_field(
            "f",
            FieldConfig::new().validator(validator_fn(|v: Value| async move {
                tokio::task::yield_now().await;
                Ok(v.as_str() == Some("first"))
            })),
        )
        .instantiate();
        field.set_value("first");

        let validating = field.validate(());
        let syncing = async {
            tokio::task::yield_now().await;
            field.set_value("second");
            field.sync().await;
        };
        let (outcome, ()) = tokio::join!(validating, syncing);

        assert_eq!(outcome.unwrap(), Some(Validation::Valid));
        assert!(!field.is_dirty());
        assert_eq!(field.value(), Value::from("second"));
    }
}
