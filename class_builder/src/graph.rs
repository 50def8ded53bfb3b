//! Materialized object graphs and their identity-preserving JSON form
//!
//! Objects live in an arena and are referred to by [`ObjectId`], so two fields
//! holding the same id hold the same object. In the tagged JSON form every bean
//! carries an `"@id"` the first time it is written; later occurrences are the bare
//! integer. Beans whose concrete type differs from the declared type of the place
//! they are written to also carry `"@type"`.
//!
//! ```json
//! { "@id": 1, "text": "Hello", "with": 1 }
//! ```

use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::constants::{ID_TAG, TYPE_TAG};
use crate::error::{Error, Result};
use crate::leaf;
use crate::resolver::TypeResolver;
use crate::type_kind::TypeKind;
use crate::type_name::TypeName;

const GRAPH_PATH: &str = "(object graph)";

/// Identity of an object inside one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(usize);

/// A value in an object graph
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    /// Absent value
    Null,
    /// Boolean scalar
    Bool(bool),
    /// Numeric scalar
    Number(Number),
    /// Text scalar, also used for chars, enum variants and codec values
    String(String),
    /// Bean, list or map
    Object(ObjectId),
}

impl GraphValue {
    /// Convert a JSON scalar; `None` for arrays and objects
    pub fn from_scalar(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// The object this value points at, if any
    pub const fn as_object(&self) -> Option<ObjectId> {
        match self {
            Self::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// JSON form of a scalar; objects have no scalar form
    pub fn as_scalar_json(&self) -> Option<Value> {
        match self {
            Self::Null => Some(Value::Null),
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Number(n) => Some(Value::Number(n.clone())),
            Self::String(s) => Some(Value::String(s.clone())),
            Self::Object(_) => None,
        }
    }

    /// Text used when the value is a map key
    fn key_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null | Self::Object(_) => None,
        }
    }
}

/// One field of a bean object
#[derive(Debug, Clone, PartialEq)]
pub struct GraphField {
    /// Property name
    pub name:          String,
    /// Declared type of the property
    pub declared_type: TypeName,
    /// Field value
    pub value:         GraphValue,
}

/// Content of an object
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectBody {
    /// Set fields in declaration order, unset optional properties omitted
    Bean(Vec<GraphField>),
    /// Ordered elements
    List {
        /// Declared element type
        element_type: TypeName,
        /// Elements
        items:        Vec<GraphValue>,
    },
    /// Ordered key/value pairs with unique scalar keys
    Map {
        /// Declared key type
        key_type:   TypeName,
        /// Declared value type
        value_type: TypeName,
        /// Entries
        entries:    Vec<(GraphValue, GraphValue)>,
    },
}

/// An object of a graph
#[derive(Debug, Clone, PartialEq)]
pub struct GraphObject {
    /// Concrete type
    pub type_name: TypeName,
    /// Content
    pub body:      ObjectBody,
}

impl GraphObject {
    /// Value of a bean field; `None` when unset or not a bean
    pub fn field(&self, name: &str) -> Option<&GraphValue> {
        match &self.body {
            ObjectBody::Bean(fields) => fields.iter().find(|f| f.name == name).map(|f| &f.value),
            _ => None,
        }
    }

    /// Elements of a list, empty for other objects
    pub fn items(&self) -> &[GraphValue] {
        match &self.body {
            ObjectBody::List { items, .. } => items,
            _ => &[],
        }
    }

    /// Entries of a map, empty for other objects
    pub fn entries(&self) -> &[(GraphValue, GraphValue)] {
        match &self.body {
            ObjectBody::Map { entries, .. } => entries,
            _ => &[],
        }
    }

    /// Value stored under `key` in a map
    pub fn get(&self, key: &GraphValue) -> Option<&GraphValue> {
        self.entries().iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// A materialized object graph
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectGraph {
    objects:   Vec<GraphObject>,
    root:      GraphValue,
    root_type: TypeName,
}

impl ObjectGraph {
    pub(crate) const fn new(root_type: TypeName) -> Self {
        Self {
            objects: Vec::new(),
            root: GraphValue::Null,
            root_type,
        }
    }

    /// Allocate an object before its content is known, so cycles can point at it
    pub(crate) fn reserve(&mut self, type_name: TypeName, body: ObjectBody) -> ObjectId {
        self.objects.push(GraphObject { type_name, body });
        ObjectId(self.objects.len() - 1)
    }

    pub(crate) fn fill(&mut self, id: ObjectId, body: ObjectBody) {
        if let Some(object) = self.objects.get_mut(id.0) {
            object.body = body;
        }
    }

    pub(crate) fn set_root(&mut self, root: GraphValue) {
        self.root = root;
    }

    /// The root value
    pub const fn root(&self) -> &GraphValue {
        &self.root
    }

    /// Declared type of the root
    pub const fn root_type(&self) -> &TypeName {
        &self.root_type
    }

    /// Look up an object
    pub fn object(&self, id: ObjectId) -> Option<&GraphObject> {
        self.objects.get(id.0)
    }

    /// The root object, when the root is not a scalar
    pub fn root_object(&self) -> Option<&GraphObject> {
        self.root.as_object().and_then(|id| self.object(id))
    }

    /// Number of objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the graph holds no object (a scalar or empty root)
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn object_or_err(&self, id: ObjectId) -> Result<&GraphObject> {
        self.object(id).ok_or_else(|| {
            Error::ContractViolation(format!("object {} is not part of this graph", id.0)).into()
        })
    }

    /// Identity-tagged JSON form
    pub fn to_json(&self) -> Result<Value> {
        let mut writer = TaggedWriter {
            graph:    self,
            tags:     HashMap::new(),
            open:     HashSet::new(),
            next_tag: 1,
        };
        writer.write(&self.root, &self.root_type)
    }

    /// Identity-tagged JSON text, pretty printed
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_json()?)
            .map_err(|e| Error::materialization(GRAPH_PATH, e).into())
    }

    /// Rebuild a graph from its identity-tagged JSON form
    pub fn from_json(value: &Value, root_type: &TypeName, resolver: &dyn TypeResolver) -> Result<Self> {
        let mut reader = TaggedReader {
            resolver,
            graph: Self::new(root_type.clone()),
            ids: HashMap::new(),
        };
        let root = reader.read(value, root_type)?;
        reader.graph.set_root(root);
        debug!(
            root_type = %root_type,
            objects = reader.graph.len(),
            "Read object graph"
        );
        Ok(reader.graph)
    }

    /// Plain JSON tree without identity tags; shared objects are duplicated and
    /// cycles are an error
    pub fn to_plain_json(&self) -> Result<Value> {
        self.plain(&self.root, &mut HashSet::new())
    }

    /// Convert an acyclic graph into any deserializable type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.to_plain_json()?)
            .map_err(|e| Error::materialization(self.root_type.as_str(), e).into())
    }

    fn plain(&self, value: &GraphValue, open: &mut HashSet<ObjectId>) -> Result<Value> {
        let GraphValue::Object(id) = value else {
            return Ok(value.as_scalar_json().unwrap_or(Value::Null));
        };
        if !open.insert(*id) {
            return Err(Error::materialization(
                GRAPH_PATH,
                "the graph is cyclic and has no plain tree form",
            )
            .into());
        }
        let object = self.object_or_err(*id)?;
        let plain = match &object.body {
            ObjectBody::Bean(fields) => Value::Object(
                fields
                    .iter()
                    .map(|f| -> Result<(String, Value)> {
                        Ok((f.name.clone(), self.plain(&f.value, open)?))
                    })
                    .collect::<Result<Map<_, _>>>()?,
            ),
            ObjectBody::List { items, .. } => Value::Array(
                items
                    .iter()
                    .map(|item| self.plain(item, open))
                    .collect::<Result<Vec<_>>>()?,
            ),
            ObjectBody::Map { entries, .. } => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| -> Result<(String, Value)> {
                        Ok((map_key(k)?, self.plain(v, open)?))
                    })
                    .collect::<Result<Map<_, _>>>()?,
            ),
        };
        open.remove(id);
        Ok(plain)
    }
}

fn map_key(key: &GraphValue) -> Result<String> {
    key.key_text().ok_or_else(|| {
        Error::materialization(GRAPH_PATH, format!("map key {key:?} is not a scalar")).into()
    })
}

struct TaggedWriter<'g> {
    graph:    &'g ObjectGraph,
    tags:     HashMap<ObjectId, u64>,
    /// Lists and maps being written; beans break cycles, containers cannot
    open:     HashSet<ObjectId>,
    next_tag: u64,
}

impl TaggedWriter<'_> {
    fn write(&mut self, value: &GraphValue, declared: &TypeName) -> Result<Value> {
        let GraphValue::Object(id) = value else {
            return Ok(value.as_scalar_json().unwrap_or(Value::Null));
        };
        let graph = self.graph;
        let object = graph.object_or_err(*id)?;
        match &object.body {
            ObjectBody::Bean(fields) => {
                if let Some(tag) = self.tags.get(id) {
                    return Ok(Value::from(*tag));
                }
                let tag = self.next_tag;
                self.next_tag += 1;
                self.tags.insert(*id, tag);

                let mut out = Map::new();
                out.insert(ID_TAG.to_string(), Value::from(tag));
                if &object.type_name != declared {
                    out.insert(
                        TYPE_TAG.to_string(),
                        Value::String(object.type_name.to_string()),
                    );
                }
                for field in fields {
                    let value = self.write(&field.value, &field.declared_type)?;
                    out.insert(field.name.clone(), value);
                }
                Ok(Value::Object(out))
            }
            ObjectBody::List {
                element_type,
                items,
            } => {
                self.enter(*id)?;
                let items = items
                    .iter()
                    .map(|item| self.write(item, element_type))
                    .collect::<Result<Vec<_>>>()?;
                self.open.remove(id);
                Ok(Value::Array(items))
            }
            ObjectBody::Map {
                value_type,
                entries,
                ..
            } => {
                self.enter(*id)?;
                let mut out = Map::new();
                for (key, value) in entries {
                    let value = self.write(value, value_type)?;
                    out.insert(map_key(key)?, value);
                }
                self.open.remove(id);
                Ok(Value::Object(out))
            }
        }
    }

    fn enter(&mut self, id: ObjectId) -> Result<()> {
        if self.open.insert(id) {
            return Ok(());
        }
        Err(Error::materialization(
            GRAPH_PATH,
            "a collection contains itself, only beans may form cycles",
        )
        .into())
    }
}

struct TaggedReader<'r> {
    resolver: &'r dyn TypeResolver,
    graph:    ObjectGraph,
    ids:      HashMap<u64, ObjectId>,
}

impl TaggedReader<'_> {
    fn read(&mut self, value: &Value, declared: &TypeName) -> Result<GraphValue> {
        let description = self.resolver.describe(declared)?;
        match (description.kind, value) {
            (_, Value::Null) => Ok(GraphValue::Null),
            (TypeKind::Value | TypeKind::Enum, scalar) => {
                let codec = self.resolver.codec_for(declared);
                let scalar = leaf::normalize(&description, codec.as_deref(), scalar)?;
                GraphValue::from_scalar(&scalar)
                    .ok_or_else(|| Error::mismatch(declared, leaf::json_type(&scalar)).into())
            }
            (TypeKind::Struct | TypeKind::Abstract, Value::Number(tag)) => {
                let object = tag.as_u64().and_then(|tag| self.ids.get(&tag)).ok_or_else(|| {
                    Error::materialization(GRAPH_PATH, format!("{tag} does not name an earlier object"))
                })?;
                Ok(GraphValue::Object(*object))
            }
            (TypeKind::Struct | TypeKind::Abstract, Value::Object(fields)) => {
                self.read_bean(fields, declared, description.is_abstract())
            }
            (TypeKind::List | TypeKind::Set, Value::Array(items)) => {
                let element_type = description.element_type.clone().ok_or_else(|| {
                    Error::schema_for_type(declared, "read", "missing element type")
                })?;
                let id = self.graph.reserve(
                    declared.clone(),
                    ObjectBody::List {
                        element_type: element_type.clone(),
                        items:        Vec::new(),
                    },
                );
                let items = items
                    .iter()
                    .map(|item| self.read(item, &element_type))
                    .collect::<Result<Vec<_>>>()?;
                self.graph.fill(id, ObjectBody::List { element_type, items });
                Ok(GraphValue::Object(id))
            }
            (TypeKind::Map, Value::Object(fields)) => {
                let (Some(key_type), Some(value_type)) =
                    (description.key_type.clone(), description.value_type.clone())
                else {
                    return Err(
                        Error::schema_for_type(declared, "read", "missing key or value type").into(),
                    );
                };
                let key_description = self.resolver.describe(&key_type)?;
                let key_codec = self.resolver.codec_for(&key_type);
                let id = self.graph.reserve(
                    declared.clone(),
                    ObjectBody::Map {
                        key_type:   key_type.clone(),
                        value_type: value_type.clone(),
                        entries:    Vec::new(),
                    },
                );
                let mut entries = Vec::with_capacity(fields.len());
                for (key, value) in fields {
                    let key = leaf::parse_text(&key_description, key_codec.as_deref(), key)?;
                    let key = GraphValue::from_scalar(&key)
                        .ok_or_else(|| Error::mismatch(&key_type, leaf::json_type(&key)))?;
                    entries.push((key, self.read(value, &value_type)?));
                }
                self.graph.fill(
                    id,
                    ObjectBody::Map {
                        key_type,
                        value_type,
                        entries,
                    },
                );
                Ok(GraphValue::Object(id))
            }
            (_, other) => Err(Error::mismatch(declared, leaf::json_type(other)).into()),
        }
    }

    fn read_bean(
        &mut self,
        fields: &Map<String, Value>,
        declared: &TypeName,
        is_abstract: bool,
    ) -> Result<GraphValue> {
        let concrete = match fields.get(TYPE_TAG) {
            Some(Value::String(tag)) => {
                let concrete = TypeName::from(tag);
                if !self.resolver.is_assignable(&concrete, declared) {
                    return Err(Error::mismatch(declared, concrete).into());
                }
                concrete
            }
            Some(other) => {
                return Err(Error::invalid_value(
                    declared,
                    format!("'{TYPE_TAG}' must be a type name, got {other}"),
                )
                .into());
            }
            None if is_abstract => self.resolver.resolve_concrete_subtype(declared)?,
            None => declared.clone(),
        };
        let description = self.resolver.describe(&concrete)?;
        if description.is_abstract() {
            return Err(Error::AmbiguousType {
                type_name:  concrete,
                candidates: Vec::new(),
            }
            .into());
        }

        let id = self.graph.reserve(concrete.clone(), ObjectBody::Bean(Vec::new()));
        if let Some(tag) = fields.get(ID_TAG) {
            let Some(tag) = tag.as_u64() else {
                return Err(Error::invalid_value(
                    &concrete,
                    format!("'{ID_TAG}' must be a positive integer, got {tag}"),
                )
                .into());
            };
            if self.ids.insert(tag, id).is_some() {
                return Err(Error::materialization(
                    GRAPH_PATH,
                    format!("object id {tag} is used twice"),
                )
                .into());
            }
        }

        if let Some(unknown) = fields
            .keys()
            .find(|name| *name != ID_TAG && *name != TYPE_TAG && description.property(name).is_none())
        {
            return Err(Error::UnknownProperty {
                type_name: concrete,
                key:       unknown.clone(),
                expected:  description.property_names(),
            }
            .into());
        }

        let mut graph_fields = Vec::new();
        for property in &description.properties {
            let Some(value) = fields.get(&property.name) else {
                continue;
            };
            graph_fields.push(GraphField {
                name:          property.name.clone(),
                declared_type: property.type_name.clone(),
                value:         self.read(value, &property.type_name)?,
            });
        }
        self.graph.fill(id, ObjectBody::Bean(graph_fields));
        Ok(GraphValue::Object(id))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;
    use crate::test_registry::{self, CONVERSATION, INVENTORY};

    fn read(value: &Value, root_type: &str) -> Result<ObjectGraph> {
        let resolver = test_registry::resolver();
        ObjectGraph::from_json(value, &TypeName::from(root_type), resolver.as_ref())
    }

    #[test]
    fn test_later_occurrence_shares_the_object() {
        let value = json!({
            "@id": 1,
            "text": "a",
            "responses": [
                { "@id": 2, "next": { "@id": 3, "text": "b" } },
                { "@id": 4, "next": 3 }
            ]
        });
        let graph = read(&value, CONVERSATION).unwrap();
        let responses = graph.root_object().unwrap().field("responses").unwrap();
        let items = graph.object(responses.as_object().unwrap()).unwrap().items();
        let next = |item: &GraphValue| {
            graph
                .object(item.as_object().unwrap())
                .unwrap()
                .field("next")
                .cloned()
        };
        assert_eq!(next(&items[0]), next(&items[1]));
        assert_eq!(graph.len(), 5);
        assert_eq!(graph.to_json().unwrap(), value);
    }

    #[test]
    fn test_unknown_id_is_rejected() {
        let err = read(&json!({ "@id": 1, "text": "a", "with": 2 }), CONVERSATION).unwrap_err();
        assert!(matches!(err.current_context(), Error::Materialization { .. }));
    }

    #[test]
    fn test_reused_id_is_rejected() {
        let value = json!({ "@id": 1, "text": "a", "with": { "@id": 1, "text": "b" } });
        let err = read(&value, CONVERSATION).unwrap_err();
        assert!(matches!(err.current_context(), Error::Materialization { .. }));
    }

    #[test]
    fn test_type_tag_must_be_assignable() {
        let value = json!({ "effect": { "@type": "demo::Item" } });
        let err = read(&value, INVENTORY).unwrap_err();
        assert!(matches!(err.current_context(), Error::TypeMismatch { .. }));
    }

    #[test]
    fn test_untagged_abstract_value_is_ambiguous() {
        let err = read(&json!({ "effect": { "amount": 1 } }), INVENTORY).unwrap_err();
        assert!(matches!(err.current_context(), Error::AmbiguousType { .. }));
    }

    #[test]
    fn test_scalars_are_checked_against_their_declared_type() {
        let err = read(&json!({ "@id": 1, "text": 5, "name": true }), CONVERSATION).unwrap_err();
        assert!(matches!(err.current_context(), Error::TypeMismatch { .. }));

        let err = read(&json!({ "id": "not-a-uuid" }), INVENTORY).unwrap_err();
        assert!(matches!(err.current_context(), Error::InvalidValue { .. }));

        let err = read(&json!({ "scores": ["x"] }), INVENTORY).unwrap_err();
        assert!(matches!(err.current_context(), Error::TypeMismatch { .. }));

        let err = read(&json!({ "scores": [1, 1.5] }), INVENTORY).unwrap_err();
        assert!(matches!(err.current_context(), Error::InvalidValue { .. }));
    }

    #[test]
    fn test_scalars_are_stored_in_canonical_form() {
        let value = json!({ "id": "6A2F41A3-C54C-4FCE-8D2D-0324E1C32E22", "scores": [3] });
        let graph = read(&value, INVENTORY).unwrap();
        assert_eq!(
            graph.root_object().unwrap().field("id"),
            Some(&GraphValue::String("6a2f41a3-c54c-4fce-8d2d-0324e1c32e22".to_string()))
        );
    }

    #[test]
    fn test_map_keys_are_parsed_with_the_key_type() {
        let value = json!({ "items": { "axe": { "label": "axe", "weight": 2.5 } } });
        let graph = read(&value, INVENTORY).unwrap();
        let items = graph.root_object().unwrap().field("items").unwrap();
        let map = graph.object(items.as_object().unwrap()).unwrap();
        assert!(map.get(&GraphValue::String("axe".to_string())).is_some());
        assert_eq!(graph.to_plain_json().unwrap(), value);
    }
}
