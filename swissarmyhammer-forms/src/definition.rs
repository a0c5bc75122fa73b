//! Model definitions written in YAML.
//!
//! ```yaml
//! fields:
//!   title: { default: "", validate: required }
//!   tags: { default: [] }
//!   due: null
//!   address:
//!     model:
//!       fields:
//!         city: { validate: required }
//! ```
//!
//! An entry that is a mapping of `value`/`default`/`validate` keys (or an
//! empty mapping) configures a field; a lone `model` key nests another
//! definition; anything else is the field's default value. Validators are
//! referenced by name and resolved against a [`ValidatorRegistry`].

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::error::{FormsError, Result};
use crate::field::FieldConfig;
use crate::model::{define_model, ModelBlueprint, ModelDeclaration};
use crate::validators::ValidatorRegistry;
use crate::value::Value;

/// A model definition as read from YAML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelDefinition {
    #[serde(default)]
    pub fields: IndexMap<String, EntryDefinition>,
}

/// Keys that make a mapping a field configuration rather than a default.
const FIELD_KEYS: &[&str] = &["value", "default", "validate"];

/// One entry of a [`ModelDefinition`].
#[derive(Debug, Clone)]
pub enum EntryDefinition {
    Nested(NestedDefinition),
    Field(FieldDefinition),
    Shorthand(Value),
}

impl<'de> Deserialize<'de> for EntryDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = serde_yaml::Value::deserialize(deserializer)?;
        let entry = match &raw {
            serde_yaml::Value::Mapping(mapping) => {
                let keys: Vec<Option<&str>> = mapping.iter().map(|(k, _)| k.as_str()).collect();
                if keys == [Some("model")] {
                    EntryDefinition::Nested(serde_yaml::from_value(raw).map_err(D::Error::custom)?)
                } else if keys
                    .iter()
                    .all(|k| k.is_some_and(|k| FIELD_KEYS.contains(&k)))
                {
                    EntryDefinition::Field(serde_yaml::from_value(raw).map_err(D::Error::custom)?)
                } else {
                    EntryDefinition::Shorthand(
                        serde_yaml::from_value(raw).map_err(D::Error::custom)?,
                    )
                }
            }
            _ => EntryDefinition::Shorthand(serde_yaml::from_value(raw).map_err(D::Error::custom)?),
        };
        Ok(entry)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NestedDefinition {
    pub model: ModelDefinition,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    #[serde(default, deserialize_with = "present")]
    pub value: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    pub default: Option<Value>,
    #[serde(default)]
    pub validate: Option<String>,
}

/// Keep an explicit `null` as `Some(Value::Null)` rather than "absent".
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl FieldDefinition {
    fn to_config(&self, registry: &ValidatorRegistry) -> Result<FieldConfig> {
        let mut config = FieldConfig::new();
        if let Some(value) = &self.value {
            config = config.value(value.clone());
        }
        if let Some(default) = &self.default {
            config = config.default_value(default.clone());
        }
        if let Some(name) = &self.validate {
            config = config.validator(registry.resolve(name)?);
        }
        Ok(config)
    }
}

impl ModelDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Build a declaration, resolving validator names against `registry`.
    pub fn to_declaration(&self, registry: &ValidatorRegistry) -> Result<ModelDeclaration> {
        let mut declaration = ModelDeclaration::new();
        for (name, entry) in &self.fields {
            if name.trim().is_empty() {
                return Err(FormsError::InvalidDefinition {
                    message: "field names must not be empty".to_string(),
                });
            }
            declaration = match entry {
                EntryDefinition::Nested(nested) => {
                    declaration.blueprint(name, nested.model.to_blueprint(registry)?)
                }
                EntryDefinition::Field(field) => {
                    declaration.field(name, field.to_config(registry)?)
                }
                EntryDefinition::Shorthand(value) => declaration.value(name, value.clone()),
            };
        }
        Ok(declaration)
    }

    pub fn to_blueprint(&self, registry: &ValidatorRegistry) -> Result<ModelBlueprint> {
        let declaration = self.to_declaration(registry)?;
        debug!(fields = declaration.len(), "model definition resolved");
        Ok(define_model(declaration))
    }
}
