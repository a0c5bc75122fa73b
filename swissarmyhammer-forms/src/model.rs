//! Model blueprints and live model instances.
//!
//! A model owns named members, each either a [`Field`] or a nested [`Model`],
//! and folds their dirty and validity states into one aggregate. Bulk
//! operations fan out to every member concurrently and recompute the
//! aggregate once, after all of them settle.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::{join_all, BoxFuture, FutureExt};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::events::{Event, EventEmitter, EventKind, Subscription};
use crate::field::{define_field, Field, FieldBlueprint, FieldConfig};
use crate::validation::{ValidateOptions, Validation, ValidationError};
use crate::value::Value;

/// Either kind of blueprint a model can hold.
#[derive(Debug, Clone)]
pub enum Blueprint {
    Field(FieldBlueprint),
    Model(ModelBlueprint),
}

impl Blueprint {
    fn instantiate(&self) -> Member {
        match self {
            Blueprint::Field(blueprint) => Member::Field(blueprint.instantiate()),
            Blueprint::Model(blueprint) => Member::Model(blueprint.instantiate()),
        }
    }
}

impl From<FieldBlueprint> for Blueprint {
    fn from(blueprint: FieldBlueprint) -> Self {
        Blueprint::Field(blueprint)
    }
}

impl From<ModelBlueprint> for Blueprint {
    fn from(blueprint: ModelBlueprint) -> Self {
        Blueprint::Model(blueprint)
    }
}

/// One declared entry of a model.
#[derive(Debug, Clone)]
pub enum Entry {
    /// A field configuration.
    Config(FieldConfig),
    /// A previously declared field or model, reused as-is.
    Blueprint(Blueprint),
    /// Shorthand for a field with this default value.
    Value(Value),
}

/// The declared shape of a model, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ModelDeclaration {
    entries: Vec<(String, Entry)>,
}

impl ModelDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plain fields with no configuration.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            entries: names
                .into_iter()
                .map(|name| (name.into(), Entry::Config(FieldConfig::new())))
                .collect(),
        }
    }

    pub fn field(self, name: impl Into<String>, config: FieldConfig) -> Self {
        self.entry(name, Entry::Config(config))
    }

    pub fn blueprint(self, name: impl Into<String>, blueprint: impl Into<Blueprint>) -> Self {
        self.entry(name, Entry::Blueprint(blueprint.into()))
    }

    pub fn value(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entry(name, Entry::Value(value.into()))
    }

    pub fn entry(mut self, name: impl Into<String>, entry: Entry) -> Self {
        self.entries.push((name.into(), entry));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for ModelDeclaration {
    fn from(names: [&'a str; N]) -> Self {
        Self::names(names)
    }
}

impl<'a> From<Vec<&'a str>> for ModelDeclaration {
    fn from(names: Vec<&'a str>) -> Self {
        Self::names(names)
    }
}

impl From<Vec<String>> for ModelDeclaration {
    fn from(names: Vec<String>) -> Self {
        Self::names(names)
    }
}

/// Resolve a declaration into an ordered list of member blueprints.
///
/// A repeated name keeps its first position and takes the last entry.
pub fn resolve_declaration(declaration: ModelDeclaration) -> Vec<(String, Blueprint)> {
    let mut resolved: IndexMap<String, Blueprint> = IndexMap::new();
    for (name, entry) in declaration.entries {
        let blueprint = match entry {
            Entry::Config(config) => Blueprint::Field(define_field(name.clone(), config)),
            Entry::Blueprint(blueprint) => blueprint,
            Entry::Value(value) => Blueprint::Field(define_field(
                name.clone(),
                FieldConfig::new().default_value(value),
            )),
        };
        resolved.insert(name, blueprint);
    }
    resolved.into_iter().collect()
}

struct ModelShape {
    members: Vec<(String, Blueprint)>,
}

/// A reusable, immutable model declaration.
#[derive(Clone)]
pub struct ModelBlueprint {
    shape: Arc<ModelShape>,
}

impl ModelBlueprint {
    /// Member names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shape.members.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&Blueprint> {
        self.shape
            .members
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, blueprint)| blueprint)
    }

    /// Whether two handles refer to the same declaration.
    pub fn ptr_eq(&self, other: &ModelBlueprint) -> bool {
        Arc::ptr_eq(&self.shape, &other.shape)
    }

    /// Create a new, independent model instance with fresh members.
    pub fn instantiate(&self) -> Model {
        let fields: IndexMap<String, Member> = self
            .shape
            .members
            .iter()
            .map(|(name, blueprint)| (name.clone(), blueprint.instantiate()))
            .collect();

        let aggregate = Aggregate {
            dirty: fields.values().any(Member::is_dirty),
            validation: snapshot(&fields),
        };

        let inner = Arc::new(ModelInner {
            blueprint: self.clone(),
            fields,
            events: EventEmitter::new(),
            aggregate: Mutex::new(aggregate),
            batch: AtomicUsize::new(0),
        });

        for member in inner.fields.values() {
            for kind in [EventKind::ValidChange, EventKind::ModifiedChange] {
                let weak: Weak<ModelInner> = Arc::downgrade(&inner);
                member.on(kind, move |_| {
                    if let Some(inner) = weak.upgrade() {
                        Model { inner }.member_changed(kind);
                    }
                });
            }
        }

        Model { inner }
    }
}

impl fmt::Debug for ModelBlueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.shape.members.iter().map(|(n, b)| (n, b)))
            .finish()
    }
}

/// What [`define_model`] builds a blueprint from.
pub enum ModelSource {
    Declaration(ModelDeclaration),
    Blueprint(ModelBlueprint),
}

impl From<ModelDeclaration> for ModelSource {
    fn from(declaration: ModelDeclaration) -> Self {
        ModelSource::Declaration(declaration)
    }
}

impl From<ModelBlueprint> for ModelSource {
    fn from(blueprint: ModelBlueprint) -> Self {
        ModelSource::Blueprint(blueprint)
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for ModelSource {
    fn from(names: [&'a str; N]) -> Self {
        ModelSource::Declaration(names.into())
    }
}

impl<'a> From<Vec<&'a str>> for ModelSource {
    fn from(names: Vec<&'a str>) -> Self {
        ModelSource::Declaration(names.into())
    }
}

/// Declare a model. An existing blueprint is returned unchanged.
pub fn define_model(source: impl Into<ModelSource>) -> ModelBlueprint {
    match source.into() {
        ModelSource::Blueprint(blueprint) => blueprint,
        ModelSource::Declaration(declaration) => ModelBlueprint {
            shape: Arc::new(ModelShape {
                members: resolve_declaration(declaration),
            }),
        },
    }
}

/// The validation state of one model member.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MemberValidation {
    Field(Validation),
    Model(IndexMap<String, MemberValidation>),
}

impl MemberValidation {
    pub fn is_valid(&self) -> Option<bool> {
        match self {
            MemberValidation::Field(validation) => validation.is_valid(),
            MemberValidation::Model(members) => {
                aggregate_valid(members.values().map(MemberValidation::is_valid))
            }
        }
    }

    /// The member's errors. Empty for valid, unvalidated and nested members.
    pub fn errors(&self) -> &[ValidationError] {
        match self {
            MemberValidation::Field(validation) => validation.errors(),
            MemberValidation::Model(_) => &[],
        }
    }
}

/// Fold member validity: none → `None`, any false → false, all true → true.
pub fn aggregate_valid<I>(states: I) -> Option<bool>
where
    I: IntoIterator<Item = Option<bool>>,
{
    let mut any = false;
    let mut all_valid = true;
    for state in states {
        any = true;
        match state {
            Some(false) => return Some(false),
            Some(true) => {}
            None => all_valid = false,
        }
    }
    (any && all_valid).then_some(true)
}

fn snapshot(fields: &IndexMap<String, Member>) -> IndexMap<String, MemberValidation> {
    fields
        .iter()
        .map(|(name, member)| (name.clone(), member.validation()))
        .collect()
}

/// A field or nested model owned by a model.
#[derive(Debug, Clone)]
pub enum Member {
    Field(Field),
    Model(Model),
}

impl Member {
    pub fn as_field(&self) -> Option<&Field> {
        match self {
            Member::Field(field) => Some(field),
            Member::Model(_) => None,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            Member::Model(model) => Some(model),
            Member::Field(_) => None,
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Member::Field(field) => field.is_dirty(),
            Member::Model(model) => model.is_dirty(),
        }
    }

    pub fn is_valid(&self) -> Option<bool> {
        match self {
            Member::Field(field) => field.is_valid(),
            Member::Model(model) => model.is_valid(),
        }
    }

    pub fn is_validating(&self) -> bool {
        match self {
            Member::Field(field) => field.is_validating(),
            Member::Model(model) => model.is_validating(),
        }
    }

    pub fn validation(&self) -> MemberValidation {
        match self {
            Member::Field(field) => MemberValidation::Field(field.validation()),
            Member::Model(model) => MemberValidation::Model(model.validation()),
        }
    }

    /// The member's value; a nested model contributes a map of its values.
    pub fn value(&self) -> Value {
        match self {
            Member::Field(field) => field.value(),
            Member::Model(model) => model.values(),
        }
    }

    pub fn sync(&self) -> BoxFuture<'_, ()> {
        match self {
            Member::Field(field) => field.sync().boxed(),
            Member::Model(model) => model.sync().boxed(),
        }
    }

    pub fn reset(&self) {
        match self {
            Member::Field(field) => field.reset(),
            Member::Model(model) => model.reset(),
        }
    }

    pub fn validate(&self, options: ValidateOptions) -> BoxFuture<'_, Result<()>> {
        match self {
            Member::Field(field) => {
                async move { field.validate(options).await.map(|_| ()) }.boxed()
            }
            Member::Model(model) => {
                async move { model.validate(options).await.map(|_| ()) }.boxed()
            }
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        match self {
            Member::Field(field) => field.on(kind, handler),
            Member::Model(model) => model.on(kind, handler),
        }
    }

    pub fn off(&self, subscription: &Subscription) -> bool {
        match self {
            Member::Field(field) => field.off(subscription),
            Member::Model(model) => model.off(subscription),
        }
    }
}

/// Aggregate state as of the last notification the model emitted.
struct Aggregate {
    dirty: bool,
    validation: IndexMap<String, MemberValidation>,
}

struct ModelInner {
    blueprint: ModelBlueprint,
    fields: IndexMap<String, Member>,
    events: EventEmitter,
    aggregate: Mutex<Aggregate>,
    /// Number of bulk operations in flight. Member notifications are absorbed
    /// while non-zero.
    batch: AtomicUsize,
}

type BatchGuard<'a> = scopeguard::ScopeGuard<&'a AtomicUsize, fn(&AtomicUsize)>;

fn end_batch(batch: &AtomicUsize) {
    batch.fetch_sub(1, Ordering::SeqCst);
}

/// A live model. `Model` is a cheap handle; clones share the same state.
#[derive(Clone)]
pub struct Model {
    inner: Arc<ModelInner>,
}

impl Model {
    pub fn blueprint(&self) -> &ModelBlueprint {
        &self.inner.blueprint
    }

    /// All members in declaration order.
    pub fn fields(&self) -> &IndexMap<String, Member> {
        &self.inner.fields
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.inner.fields.get(name)
    }

    /// The named member, if it is a field.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.member(name).and_then(Member::as_field)
    }

    /// The named member, if it is a nested model.
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.member(name).and_then(Member::as_model)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.fields.values().any(Member::is_dirty)
    }

    pub fn is_valid(&self) -> Option<bool> {
        aggregate_valid(self.inner.fields.values().map(Member::is_valid))
    }

    pub fn is_validating(&self) -> bool {
        self.inner.fields.values().any(Member::is_validating)
    }

    pub fn validation(&self) -> IndexMap<String, MemberValidation> {
        snapshot(&self.inner.fields)
    }

    /// Current values as a map, recursing into nested models.
    pub fn values(&self) -> Value {
        Value::Map(
            self.inner
                .fields
                .iter()
                .map(|(name, member)| (name.clone(), member.value()))
                .collect(),
        )
    }

    /// Sync every member, then emit whatever aggregate changes resulted.
    pub async fn sync(&self) {
        {
            let _batch = self.begin_batch();
            join_all(self.inner.fields.values().map(Member::sync)).await;
        }
        debug!(members = self.inner.fields.len(), "model synced");
        self.refresh();
    }

    /// Reset every member, then emit whatever aggregate changes resulted.
    pub fn reset(&self) {
        {
            let _batch = self.begin_batch();
            for member in self.inner.fields.values() {
                member.reset();
            }
        }
        debug!(members = self.inner.fields.len(), "model reset");
        self.refresh();
    }

    /// Validate members that need it and return the aggregate validity.
    ///
    /// A member is validated when `force` is set, it has never been validated,
    /// or a validation is in flight; settled members keep their outcome. The
    /// first validator failure in member order is returned after every
    /// dispatched validation settles.
    pub async fn validate(&self, options: impl Into<ValidateOptions>) -> Result<Option<bool>> {
        let options = options.into();
        let results = {
            let _batch = self.begin_batch();
            let pending: Vec<_> = self
                .inner
                .fields
                .iter()
                .filter(|(_, member)| {
                    options.force || member.is_valid().is_none() || member.is_validating()
                })
                .map(|(name, member)| {
                    debug!(member = %name, force = options.force, "validating member");
                    member.validate(options)
                })
                .collect();
            join_all(pending).await
        };
        // Members may have settled or been edited even when one validator failed.
        self.refresh();
        results.into_iter().collect::<Result<Vec<()>>>()?;

        let valid = self.is_valid();
        debug!(valid = ?valid, "model validated");
        Ok(valid)
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
    pub fn ptr_eq(&self, other: &Model) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn begin_batch(&self) -> BatchGuard<'_> {
        self.inner.batch.fetch_add(1, Ordering::SeqCst);
        scopeguard::guard(&self.inner.batch, end_batch as fn(&AtomicUsize))
    }

    fn member_changed(&self, kind: EventKind) {
        if self.inner.batch.load(Ordering::SeqCst) > 0 {
            return;
        }
        match kind {
            EventKind::ModifiedChange => self.refresh_dirty(),
            EventKind::ValidChange => self.refresh_validation(),
        }
    }

    /// Recompute both aggregates after a bulk operation absorbed member events.
    fn refresh(&self) {
        self.refresh_dirty();
        self.refresh_validation();
    }

    fn aggregate(&self) -> MutexGuard<'_, Aggregate> {
        self.inner.aggregate.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_dirty(&self) {
        let dirty = self.is_dirty();
        let flipped = {
            let mut aggregate = self.aggregate();
            let flipped = aggregate.dirty != dirty;
            aggregate.dirty = dirty;
            flipped
        };
        if flipped {
            debug!(dirty, "model modified state changed");
            self.inner.events.emit(&Event::ModifiedChange {
                dirty,
                source: Member::Model(self.clone()),
            });
        }
    }

    fn refresh_validation(&self) {
        let validation = self.validation();
        let changed = {
            let mut aggregate = self.aggregate();
            let changed = aggregate.validation != validation;
            if changed {
                aggregate.validation = validation;
            }
            changed
        };
        if changed {
            let valid = self.is_valid();
            debug!(valid = ?valid, "model validity changed");
            self.inner.events.emit(&Event::ValidChange {
                valid,
                source: Member::Model(self.clone()),
            });
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("fields", &self.inner.fields)
            .field("dirty", &self.is_dirty())
            .field("valid", &self.is_valid())
            .finish()
    }
}
