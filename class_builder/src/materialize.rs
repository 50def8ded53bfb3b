//! Converts a builder (sub)tree into an [`ObjectGraph`]
//!
//! Every bean, collection and map becomes exactly one object no matter how many
//! references point at it. Objects are allocated before their content is
//! materialized, so a bean that references itself ends up holding its own id.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::graph::{GraphField, GraphValue, ObjectBody, ObjectGraph};
use crate::node::{NodeId, NodeKind};
use crate::tree::BuilderTree;

/// Walks a builder tree and produces an object graph
pub struct Materializer<'t> {
    tree:  &'t BuilderTree,
    graph: ObjectGraph,
    memo:  HashMap<NodeId, GraphValue>,
}

impl<'t> Materializer<'t> {
    /// Materialize the subtree at `node`. Any failure aborts the whole operation
    /// and names the failing node's path.
    pub fn materialize(tree: &'t BuilderTree, node: NodeId) -> Result<ObjectGraph> {
        let declared = tree.node(node)?.declared_type().clone();
        let mut materializer = Self {
            tree,
            graph: ObjectGraph::new(declared),
            memo: HashMap::new(),
        };
        let root = materializer.value_of(node)?;
        materializer.graph.set_root(root);
        debug!(
            node = %node,
            objects = materializer.graph.len(),
            "Materialized builder tree"
        );
        Ok(materializer.graph)
    }

    /// Materialize the whole tree
    pub fn materialize_root(tree: &'t BuilderTree) -> Result<ObjectGraph> {
        Self::materialize(tree, tree.root())
    }

    fn path(&self, id: NodeId) -> String {
        self.tree.path(id).unwrap_or_else(|_| id.to_string())
    }

    fn value_of(&mut self, id: NodeId) -> Result<GraphValue> {
        let target = self.tree.resolve(id).map_err(|_| {
            Error::materialization(self.path(id), "the referenced slot is empty")
        })?;
        if let Some(value) = self.memo.get(&target) {
            return Ok(value.clone());
        }
        let tree = self.tree;
        let node = tree.node(target)?;
        match node.kind() {
            NodeKind::Leaf(leaf) => GraphValue::from_scalar(leaf.value()).ok_or_else(|| {
                Error::materialization(self.path(target), "leaf holds a structured value").into()
            }),
            NodeKind::Bean(bean) => {
                let object = self
                    .graph
                    .reserve(node.type_name().clone(), ObjectBody::Bean(Vec::new()));
                self.memo.insert(target, GraphValue::Object(object));
                let mut fields = Vec::new();
                for (name, slot) in &bean.slots {
                    let property = bean.description().property(name).ok_or_else(|| {
                        Error::materialization(self.path(target), format!("no metadata for '{name}'"))
                    })?;
                    match slot {
                        Some(child) => fields.push(GraphField {
                            name:          name.clone(),
                            declared_type: property.type_name.clone(),
                            value:         self.value_of(*child)?,
                        }),
                        None if property.required => {
                            return Err(Error::MissingRequiredProperty {
                                path:     self.path(target),
                                property: name.clone(),
                            }
                            .into());
                        }
                        None => {}
                    }
                }
                self.graph.fill(object, ObjectBody::Bean(fields));
                Ok(GraphValue::Object(object))
            }
            NodeKind::Collection(collection) => {
                let element_type = collection.element_type().clone();
                let object = self.graph.reserve(
                    node.type_name().clone(),
                    ObjectBody::List {
                        element_type: element_type.clone(),
                        items:        Vec::new(),
                    },
                );
                self.memo.insert(target, GraphValue::Object(object));
                let mut items = Vec::with_capacity(collection.elements.len());
                for (element, slot) in &collection.elements {
                    let Some(child) = slot else {
                        return Err(Error::materialization(
                            self.path(target),
                            format!("element {element} is unset"),
                        )
                        .into());
                    };
                    items.push(self.value_of(*child)?);
                }
                self.graph.fill(object, ObjectBody::List { element_type, items });
                Ok(GraphValue::Object(object))
            }
            NodeKind::Map(map) => {
                let (key_type, value_type) = (map.key_type().clone(), map.value_type().clone());
                let object = self.graph.reserve(
                    node.type_name().clone(),
                    ObjectBody::Map {
                        key_type:   key_type.clone(),
                        value_type: value_type.clone(),
                        entries:    Vec::new(),
                    },
                );
                self.memo.insert(target, GraphValue::Object(object));
                let mut entries: Vec<(GraphValue, GraphValue)> = Vec::with_capacity(map.entries().len());
                for entry in map.entries() {
                    let Some(key_node) = entry.key else {
                        return Err(Error::materialization(
                            self.path(target),
                            format!("entry {} has no key", entry.id),
                        )
                        .into());
                    };
                    let key = self.value_of(key_node)?;
                    if matches!(key, GraphValue::Null | GraphValue::Object(_)) {
                        return Err(Error::materialization(
                            self.path(key_node),
                            "map keys must be scalar values",
                        )
                        .into());
                    }
                    if entries.iter().any(|(existing, _)| existing == &key) {
                        return Err(Error::materialization(
                            self.path(key_node),
                            format!("duplicate map key {key:?}"),
                        )
                        .into());
                    }
                    let value = match entry.value {
                        Some(value_node) => self.value_of(value_node)?,
                        None => GraphValue::Null,
                    };
                    entries.push((key, value));
                }
                self.graph.fill(
                    object,
                    ObjectBody::Map {
                        key_type,
                        value_type,
                        entries,
                    },
                );
                Ok(GraphValue::Object(object))
            }
            NodeKind::Reference(_) => Err(Error::ContractViolation(format!(
                "{} resolves to another reference",
                self.path(id)
            ))
            .into()),
        }
    }
}

/// Materialize the subtree at `node` straight into a deserializable type
///
/// Only acyclic graphs have a plain form; shared objects are duplicated.
pub fn materialize_into<T: DeserializeOwned>(tree: &BuilderTree, node: NodeId) -> Result<T> {
    Materializer::materialize(tree, node)?.deserialize()
}
