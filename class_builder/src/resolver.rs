//! Type resolution: the structural metadata a builder tree needs about each type
//!
//! The builder never introspects types itself. Everything it knows about a type comes
//! from a [`TypeResolver`], obtained once per type and cached by the tree. The
//! [`RegistryResolver`] implementation reads a JSON type registry shaped like:
//!
//! ```json
//! {
//!   "demo::Conversation": {
//!     "kind": "Struct",
//!     "extends": ["demo::Identifiable"],
//!     "required": ["text"],
//!     "properties": {
//!       "text": { "type": "String", "description": "The text the player reads" },
//!       "name": { "type": "String", "default": "Conversation" },
//!       "responses": { "type": "Vec<demo::Response>", "default": [] }
//!     }
//!   },
//!   "Vec<demo::Response>": { "kind": "List", "items": "demo::Response" }
//! }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};
use tracing::{debug, warn};

use crate::codec::{TextCodec, builtin_codec};
use crate::error::{Error, Result};
use crate::type_kind::TypeKind;
use crate::type_name::TypeName;

/// Field names used in registry schema entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "camelCase")]
pub enum SchemaField {
    /// Default literal of a property, or default variant of an enum
    Default,
    /// Concrete type picked for an abstract type when nothing else decides
    DefaultImpl,
    /// Human readable documentation
    Description,
    /// Direct supertypes
    Extends,
    /// Element type of a list or set
    Items,
    /// Key type of a map
    KeyType,
    /// Type kind, see [`TypeKind`]
    Kind,
    /// Property table of a struct
    Properties,
    /// Property that cannot be edited once created
    ReadOnly,
    /// Required property names
    Required,
    /// Declared type of a property
    Type,
    /// Value type of a map
    ValueType,
    /// Variant names of an enum
    Variants,
}

/// Metadata of a single bean property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMetadata {
    /// Property name, the slot key in the owning bean
    pub name:        String,
    /// Declared type of the property
    pub type_name:   TypeName,
    /// Whether materialization requires the slot to be set
    pub required:    bool,
    /// Default literal, `None` when the property has no default
    pub default:     Option<Value>,
    /// Documentation only
    pub description: Option<String>,
    /// Leaves created for this property reject edits
    pub read_only:   bool,
}

impl PropertyMetadata {
    /// Create metadata for an optional property without a default
    pub fn new(name: impl Into<String>, type_name: impl Into<TypeName>) -> Self {
        Self {
            name:        name.into(),
            type_name:   type_name.into(),
            required:    false,
            default:     None,
            description: None,
            read_only:   false,
        }
    }

    /// Whether the registry gives this property a default literal
    pub const fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// Structural description of a type
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescription {
    /// The described type
    pub type_name:       TypeName,
    /// Which node variant the type maps to
    pub kind:            TypeKind,
    /// Bean properties in declaration order, empty for non-struct kinds
    pub properties:      Vec<PropertyMetadata>,
    /// Element type of lists and sets
    pub element_type:    Option<TypeName>,
    /// Key type of maps
    pub key_type:        Option<TypeName>,
    /// Value type of maps
    pub value_type:      Option<TypeName>,
    /// Variants of an enum in declaration order
    pub variants:        Vec<String>,
    /// Variant flagged as the default one
    pub default_variant: Option<String>,
    /// Direct supertypes
    pub supertypes:      Vec<TypeName>,
}

impl TypeDescription {
    /// Description of a value type, used for built-in primitives and codec types
    pub fn value(type_name: TypeName) -> Self {
        Self {
            type_name,
            kind: TypeKind::Value,
            properties: Vec::new(),
            element_type: None,
            key_type: None,
            value_type: None,
            variants: Vec::new(),
            default_variant: None,
            supertypes: Vec::new(),
        }
    }

    /// Look up a property by name
    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Interface or abstract type
    pub const fn is_abstract(&self) -> bool {
        matches!(self.kind, TypeKind::Abstract)
    }

    /// List or set
    pub const fn is_collection_like(&self) -> bool {
        self.kind.is_collection_like()
    }

    /// Map
    pub const fn is_map_like(&self) -> bool {
        matches!(self.kind, TypeKind::Map)
    }

    /// Value or enum, edited as a leaf
    pub const fn is_primitive_like(&self) -> bool {
        self.kind.is_leaf()
    }

    /// Names of all properties, in declaration order
    pub fn property_names(&self) -> String {
        self.properties
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// External service providing structural metadata and subtype resolution
///
/// Subtype discovery may be slow for large type graphs; the builder only calls
/// [`TypeResolver::subtypes_of`] from background scans.
pub trait TypeResolver: Send + Sync {
    /// Describe the structure of `type_name`
    fn describe(&self, type_name: &TypeName) -> Result<TypeDescription>;

    /// All concrete types assignable to `type_name`, in a stable order
    fn subtypes_of(&self, type_name: &TypeName) -> Result<Vec<TypeName>>;

    /// Pick a concrete type for `type_name`, which is returned unchanged when it is
    /// already concrete. Fails with [`Error::AmbiguousType`] when no single choice exists.
    fn resolve_concrete_subtype(&self, type_name: &TypeName) -> Result<TypeName> {
        let description = self.describe(type_name)?;
        if !description.is_abstract() {
            return Ok(type_name.clone());
        }
        let candidates = self.subtypes_of(type_name)?;
        match candidates.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(Error::AmbiguousType {
                type_name: type_name.clone(),
                candidates,
            }
            .into()),
        }
    }

    /// Codec used to edit and store leaves of `type_name`
    fn codec_for(&self, type_name: &TypeName) -> Option<Arc<dyn TextCodec>> {
        builtin_codec(type_name)
    }

    /// Whether a value of type `from` may be stored in a slot declared as `to`
    fn is_assignable(&self, from: &TypeName, to: &TypeName) -> bool {
        if to.is_any() || from == to || (from.is_string() && to.is_string()) {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from.clone()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Ok(description) = self.describe(&current) else {
                continue;
            };
            for supertype in description.supertypes {
                if &supertype == to {
                    return true;
                }
                queue.push_back(supertype);
            }
        }
        false
    }
}

/// A [`TypeResolver`] backed by a JSON type registry
#[derive(Debug, Clone)]
pub struct RegistryResolver {
    registry: Arc<HashMap<TypeName, Value>>,
}

impl RegistryResolver {
    /// Build a resolver from a registry object mapping type names to schema entries
    pub fn from_json(registry: Value) -> Result<Self> {
        let Value::Object(entries) = registry else {
            return Err(Error::SchemaProcessing(
                "type registry must be a JSON object keyed by type name".to_string(),
            )
            .into());
        };
        let registry = entries
            .into_iter()
            .map(|(name, schema)| (TypeName::from(name), schema))
            .collect::<HashMap<_, _>>();
        debug!(types = registry.len(), "Loaded type registry");
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    /// Parse a registry from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::SchemaProcessing(format!("registry is not valid JSON: {e}")))?;
        Self::from_json(value)
    }

    /// Look up a raw schema entry
    pub fn get_registry_type_schema(&self, type_name: &TypeName) -> Option<&Value> {
        self.registry.get(type_name)
    }

    fn string_list(schema: &Value, field: SchemaField) -> Vec<String> {
        schema
            .get(field.as_ref())
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn type_field(schema: &Value, field: SchemaField) -> Option<TypeName> {
        schema
            .get(field.as_ref())
            .and_then(Value::as_str)
            .map(TypeName::from)
    }

    fn parse_property(
        owner: &TypeName,
        name: &str,
        entry: &Value,
        required: &[String],
    ) -> Result<PropertyMetadata> {
        let mut property = match entry {
            Value::String(type_name) => PropertyMetadata::new(name, type_name),
            Value::Object(_) => {
                let type_name = Self::type_field(entry, SchemaField::Type).ok_or_else(|| {
                    Error::schema_for_type(
                        owner,
                        "parse_property",
                        format!("property '{name}' has no 'type'"),
                    )
                })?;
                let mut property = PropertyMetadata::new(name, type_name);
                property.default = entry
                    .get(SchemaField::Default.as_ref())
                    .filter(|default| !default.is_null())
                    .cloned();
                property.description = entry
                    .get(SchemaField::Description.as_ref())
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                property.read_only = entry
                    .get(SchemaField::ReadOnly.as_ref())
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                property.required = entry
                    .get(SchemaField::Required.as_ref())
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                property
            }
            other => {
                return Err(Error::schema_for_type(
                    owner,
                    "parse_property",
                    format!("property '{name}' must be a type name or an object, got {other}"),
                )
                .into());
            }
        };
        property.required |= required.iter().any(|r| r == name);
        Ok(property)
    }

    fn describe_schema(type_name: &TypeName, schema: &Value) -> Result<TypeDescription> {
        let kind = TypeKind::from_schema(schema, type_name);
        let required = Self::string_list(schema, SchemaField::Required);

        let properties = match schema.get(SchemaField::Properties.as_ref()) {
            Some(Value::Object(props)) => props
                .iter()
                .map(|(name, entry)| Self::parse_property(type_name, name, entry, &required))
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(Error::schema_for_type(
                    type_name,
                    "describe",
                    format!("'properties' must be an object, got {other}"),
                )
                .into());
            }
            None => Vec::new(),
        };

        let description = TypeDescription {
            type_name: type_name.clone(),
            kind,
            properties,
            element_type: Self::type_field(schema, SchemaField::Items),
            key_type: Self::type_field(schema, SchemaField::KeyType),
            value_type: Self::type_field(schema, SchemaField::ValueType),
            variants: Self::string_list(schema, SchemaField::Variants),
            default_variant: schema
                .get(SchemaField::Default.as_ref())
                .and_then(Value::as_str)
                .map(ToString::to_string),
            supertypes: Self::string_list(schema, SchemaField::Extends)
                .into_iter()
                .map(TypeName::from)
                .collect(),
        };

        match kind {
            TypeKind::List | TypeKind::Set if description.element_type.is_none() => {
                Err(Error::schema_for_type(type_name, "describe", "missing 'items'").into())
            }
            TypeKind::Map if description.key_type.is_none() || description.value_type.is_none() => {
                Err(Error::schema_for_type(
                    type_name,
                    "describe",
                    "missing 'keyType' or 'valueType'",
                )
                .into())
            }
            TypeKind::Enum if description.variants.is_empty() => {
                Err(Error::schema_for_type(type_name, "describe", "enum has no variants").into())
            }
            _ => Ok(description),
        }
    }
}

impl TypeResolver for RegistryResolver {
    fn describe(&self, type_name: &TypeName) -> Result<TypeDescription> {
        if let Some(schema) = self.registry.get(type_name) {
            return Self::describe_schema(type_name, schema);
        }
        if type_name.primitive_kind().is_some() || type_name.has_builtin_codec() {
            return Ok(TypeDescription::value(type_name.clone()));
        }
        warn!(type_name = %type_name, "Schema missing for type");
        Err(Error::schema_for_type(type_name, "describe", "type is not registered").into())
    }

    fn subtypes_of(&self, type_name: &TypeName) -> Result<Vec<TypeName>> {
        let mut found = self
            .registry
            .iter()
            .filter(|(candidate, schema)| {
                TypeKind::from_schema(schema, candidate) != TypeKind::Abstract
                    && self.is_assignable(candidate, type_name)
            })
            .map(|(candidate, _)| candidate.clone())
            .collect::<Vec<_>>();
        found.sort();
        Ok(found)
    }

    fn resolve_concrete_subtype(&self, type_name: &TypeName) -> Result<TypeName> {
        let description = self.describe(type_name)?;
        if description.is_primitive_like() {
            return Err(Error::ContractViolation(format!(
                "cannot resolve a subtype of value type {type_name}"
            ))
            .into());
        }
        if !description.is_abstract() {
            return Ok(type_name.clone());
        }
        if let Some(default_impl) = self
            .registry
            .get(type_name)
            .and_then(|schema| Self::type_field(schema, SchemaField::DefaultImpl))
        {
            debug!(type_name = %type_name, chosen = %default_impl, "Using default implementation");
            return Ok(default_impl);
        }
        let candidates = self.subtypes_of(type_name)?;
        match candidates.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(Error::AmbiguousType {
                type_name: type_name.clone(),
                candidates,
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use serde_json::json;

    use super::*;

    fn resolver() -> RegistryResolver {
        RegistryResolver::from_json(json!({
            "demo::Precondition": { "kind": "Abstract" },
            "demo::Effect": { "kind": "Abstract" },
            "demo::AlwaysTrue": { "kind": "Struct", "extends": ["demo::Precondition"] },
            "demo::Heal": { "kind": "Struct", "extends": ["demo::Effect"], "properties": { "amount": "i32" } },
            "demo::Damage": { "kind": "Struct", "extends": ["demo::Effect"], "properties": { "amount": "i32" } },
            "demo::Named": {
                "kind": "Struct",
                "required": ["name"],
                "properties": {
                    "name": { "type": "String", "default": "x", "description": "shown in lists" },
                    "count": "u8"
                }
            },
            "demo::Mood": { "kind": "Enum", "variants": ["Happy", "Sad"], "default": "Sad" }
        }))
        .unwrap()
    }

    #[test]
    fn test_describe_reads_properties_in_order() {
        let description = resolver().describe(&TypeName::from("demo::Named")).unwrap();
        assert_eq!(description.kind, TypeKind::Struct);
        let names: Vec<_> = description.properties.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["name", "count"]);
        let name = description.property("name").unwrap();
        assert!(name.required);
        assert_eq!(name.default, Some(json!("x")));
        assert_eq!(name.description.as_deref(), Some("shown in lists"));
        assert!(!description.property("count").unwrap().required);
    }

    #[test]
    fn test_describe_builtin_primitive_without_registry_entry() {
        let description = resolver().describe(&TypeName::from("i64")).unwrap();
        assert_eq!(description.kind, TypeKind::Value);
    }

    #[test]
    fn test_describe_unknown_type_fails() {
        let err = resolver().describe(&TypeName::from("demo::Missing")).unwrap_err();
        assert!(matches!(err.current_context(), Error::SchemaProcessing(_)));
    }

    #[test]
    fn test_single_subtype_is_resolved() {
        let chosen = resolver()
            .resolve_concrete_subtype(&TypeName::from("demo::Precondition"))
            .unwrap();
        assert_eq!(chosen, TypeName::from("demo::AlwaysTrue"));
    }

    #[test]
    fn test_multiple_subtypes_are_ambiguous() {
        let err = resolver()
            .resolve_concrete_subtype(&TypeName::from("demo::Effect"))
            .unwrap_err();
        match err.current_context() {
            Error::AmbiguousType { candidates, .. } => assert_eq!(
                candidates,
                &vec![TypeName::from("demo::Damage"), TypeName::from("demo::Heal")]
            ),
            other => panic!("expected AmbiguousType, got {other:?}"),
        }
    }

    #[test]
    fn test_resolving_value_type_is_contract_violation() {
        let err = resolver()
            .resolve_concrete_subtype(&TypeName::from("i32"))
            .unwrap_err();
        assert!(matches!(err.current_context(), Error::ContractViolation(_)));
    }

    #[test]
    fn test_assignability_follows_supertypes() {
        let resolver = resolver();
        assert!(resolver.is_assignable(
            &TypeName::from("demo::Heal"),
            &TypeName::from("demo::Effect")
        ));
        assert!(!resolver.is_assignable(
            &TypeName::from("demo::Heal"),
            &TypeName::from("demo::Precondition")
        ));
        assert!(resolver.is_assignable(&TypeName::from("String"), &TypeName::from("alloc::string::String")));
        assert!(resolver.is_assignable(&TypeName::from("i32"), &TypeName::any()));
    }

    #[test]
    fn test_list_without_items_is_rejected() {
        let resolver = RegistryResolver::from_json(json!({ "Vec<x>": { "kind": "List" } })).unwrap();
        assert!(resolver.describe(&TypeName::from("Vec<x>")).is_err());
    }
}
