//! Builder nodes: the closed set of node variants a builder tree is made of
//!
//! Every node has an immutable key, an owning parent (or the root sentinel), a
//! declared type and per-variant data. Parents hold their children as slots; an
//! empty slot is `None`, never a missing key.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};

use crate::codec::TextCodec;
use crate::resolver::{PropertyMetadata, TypeDescription};
use crate::type_name::TypeName;

/// Identity of a node inside one tree, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Parent of the root node. Its own parent is itself.
    pub const SENTINEL: Self = Self(0);

    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Whether this is the root sentinel
    pub const fn is_sentinel(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Stable synthetic key of a collection element or map entry
///
/// Ids are handed out by the tree and never re-derived, so removing an element
/// leaves the keys of its siblings (and references into them) intact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(u64);

impl ElementId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Key of a slot in its parent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotKey {
    /// The single slot of the root sentinel
    Root(String),
    /// Bean property
    Field(String),
    /// Collection element
    Element(ElementId),
    /// Key half of a map entry
    EntryKey(ElementId),
    /// Value half of a map entry
    EntryValue(ElementId),
}

impl SlotKey {
    /// Key of a bean property
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    /// Map entry keys may neither hold nor be the target of a reference
    pub const fn is_entry_key(&self) -> bool {
        matches!(self, Self::EntryKey(_))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root(name) | Self::Field(name) => write!(f, "{name}"),
            Self::Element(id) => write!(f, "{id}"),
            Self::EntryKey(id) => write!(f, "{id} key"),
            Self::EntryValue(id) => write!(f, "{id} value"),
        }
    }
}

/// Discriminator of [`NodeKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum NodeKindTag {
    /// Primitive, string, enum or codec value
    Leaf,
    /// Struct-like node with one slot per property
    Bean,
    /// Ordered or unordered sequence
    Collection,
    /// Sequence of key/value entries
    Map,
    /// Non-owning alias of another slot
    Reference,
}

/// A leaf value
#[derive(Debug, Clone)]
pub struct LeafNode {
    pub(crate) value:     Value,
    pub(crate) immutable: bool,
    pub(crate) codec:     Option<Arc<dyn TextCodec>>,
    /// Allowed values when the leaf is an enum
    pub(crate) variants:  Vec<String>,
}

impl LeafNode {
    /// Current value
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Enum variants, empty for non-enum leaves
    pub fn variants(&self) -> &[String] {
        &self.variants
    }
}

/// A struct-like node
#[derive(Debug, Clone)]
pub struct BeanNode {
    pub(crate) description: Arc<TypeDescription>,
    /// One slot per property, in declaration order
    pub(crate) slots:       Vec<(String, Option<NodeId>)>,
}

impl BeanNode {
    /// Structural description of the bean's concrete type
    pub fn description(&self) -> &TypeDescription {
        &self.description
    }

    /// Slot for a property; `None` when the property does not exist
    pub fn slot(&self, name: &str) -> Option<Option<NodeId>> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == name)
            .map(|(_, child)| *child)
    }
}

/// A collection node
#[derive(Debug, Clone)]
pub struct CollectionNode {
    pub(crate) element_type: TypeName,
    pub(crate) ordered:      bool,
    pub(crate) elements:     Vec<(ElementId, Option<NodeId>)>,
}

impl CollectionNode {
    /// Declared type of every element
    pub const fn element_type(&self) -> &TypeName {
        &self.element_type
    }

    /// Whether element order is significant (a list rather than a set)
    pub const fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Element ids in order
    pub fn element_ids(&self) -> Vec<ElementId> {
        self.elements.iter().map(|(id, _)| *id).collect()
    }
}

/// One key/value pair of a map node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    /// Stable id of the entry
    pub id:    ElementId,
    /// Key node
    pub key:   Option<NodeId>,
    /// Value node
    pub value: Option<NodeId>,
}

/// A map node, kept as an ordered sequence of entries so that keys can be full nodes
#[derive(Debug, Clone)]
pub struct MapNode {
    pub(crate) key_type:   TypeName,
    pub(crate) value_type: TypeName,
    pub(crate) entries:    Vec<MapEntry>,
}

impl MapNode {
    /// Entries in insertion order
    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }

    /// Declared type of every key
    pub const fn key_type(&self) -> &TypeName {
        &self.key_type
    }

    /// Declared type of every value
    pub const fn value_type(&self) -> &TypeName {
        &self.value_type
    }
}

/// Coordinates of the slot a reference aliases
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceNode {
    pub(crate) target_parent: NodeId,
    pub(crate) target_key:    SlotKey,
}

impl ReferenceNode {
    /// Parent of the aliased slot
    pub const fn target_parent(&self) -> NodeId {
        self.target_parent
    }

    /// Key of the aliased slot
    pub const fn target_key(&self) -> &SlotKey {
        &self.target_key
    }
}

/// Per-variant node data
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Primitive, string, enum or codec value
    Leaf(LeafNode),
    /// Struct-like node
    Bean(BeanNode),
    /// Sequence of elements
    Collection(CollectionNode),
    /// Sequence of entries
    Map(MapNode),
    /// Alias of another slot
    Reference(ReferenceNode),
}

impl NodeKind {
    /// Discriminator of this variant
    pub const fn tag(&self) -> NodeKindTag {
        match self {
            Self::Leaf(_) => NodeKindTag::Leaf,
            Self::Bean(_) => NodeKindTag::Bean,
            Self::Collection(_) => NodeKindTag::Collection,
            Self::Map(_) => NodeKindTag::Map,
            Self::Reference(_) => NodeKindTag::Reference,
        }
    }

    /// Content of the slot at `key`; the outer `None` means the key is not a slot of this node
    pub fn slot(&self, key: &SlotKey) -> Option<Option<NodeId>> {
        match (self, key) {
            (Self::Bean(bean), SlotKey::Field(name)) => bean.slot(name),
            (Self::Collection(collection), SlotKey::Element(id)) => collection
                .elements
                .iter()
                .find(|(element, _)| element == id)
                .map(|(_, child)| *child),
            (Self::Map(map), SlotKey::EntryKey(id)) => map
                .entries
                .iter()
                .find(|entry| entry.id == *id)
                .map(|entry| entry.key),
            (Self::Map(map), SlotKey::EntryValue(id)) => map
                .entries
                .iter()
                .find(|entry| entry.id == *id)
                .map(|entry| entry.value),
            _ => None,
        }
    }

    pub(crate) fn slot_mut(&mut self, key: &SlotKey) -> Option<&mut Option<NodeId>> {
        match (self, key) {
            (Self::Bean(bean), SlotKey::Field(name)) => bean
                .slots
                .iter_mut()
                .find(|(slot, _)| slot == name)
                .map(|(_, child)| child),
            (Self::Collection(collection), SlotKey::Element(id)) => collection
                .elements
                .iter_mut()
                .find(|(element, _)| element == id)
                .map(|(_, child)| child),
            (Self::Map(map), SlotKey::EntryKey(id)) => map
                .entries
                .iter_mut()
                .find(|entry| entry.id == *id)
                .map(|entry| &mut entry.key),
            (Self::Map(map), SlotKey::EntryValue(id)) => map
                .entries
                .iter_mut()
                .find(|entry| entry.id == *id)
                .map(|entry| &mut entry.value),
            _ => None,
        }
    }

    /// All slots in order
    pub fn slots(&self) -> Vec<(SlotKey, Option<NodeId>)> {
        match self {
            Self::Bean(bean) => bean
                .slots
                .iter()
                .map(|(name, child)| (SlotKey::Field(name.clone()), *child))
                .collect(),
            Self::Collection(collection) => collection
                .elements
                .iter()
                .map(|(id, child)| (SlotKey::Element(*id), *child))
                .collect(),
            Self::Map(map) => map
                .entries
                .iter()
                .flat_map(|entry| {
                    [
                        (SlotKey::EntryKey(entry.id), entry.key),
                        (SlotKey::EntryValue(entry.id), entry.value),
                    ]
                })
                .collect(),
            Self::Leaf(_) | Self::Reference(_) => Vec::new(),
        }
    }

    /// Human readable list of the valid slot keys, for error messages
    pub fn expected_keys(&self) -> String {
        let keys = self
            .slots()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect::<Vec<_>>();
        if keys.is_empty() {
            "(no slots)".to_string()
        } else {
            keys.join(", ")
        }
    }
}

/// A node of a builder tree
#[derive(Debug, Clone)]
pub struct BuilderNode {
    pub(crate) id:            NodeId,
    pub(crate) key:           SlotKey,
    pub(crate) parent:        NodeId,
    /// Type of the slot the node lives in, possibly abstract
    pub(crate) declared_type: TypeName,
    /// Concrete type of the value held
    pub(crate) type_name:     TypeName,
    pub(crate) property:      Option<PropertyMetadata>,
    pub(crate) kind:          NodeKind,
}

impl BuilderNode {
    /// Identity of this node
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Key of the slot this node occupies
    pub const fn key(&self) -> &SlotKey {
        &self.key
    }

    /// Owning node, [`NodeId::SENTINEL`] for the root
    pub const fn parent(&self) -> NodeId {
        self.parent
    }

    /// Type the slot declares
    pub const fn declared_type(&self) -> &TypeName {
        &self.declared_type
    }

    /// Concrete type of the held value
    pub const fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    /// Property metadata when the node is a bean property
    pub const fn property(&self) -> Option<&PropertyMetadata> {
        self.property.as_ref()
    }

    /// Variant data
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Leaves and references have no navigable children
    pub const fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_) | NodeKind::Reference(_))
    }

    /// References and read-only leaves cannot be edited
    pub const fn is_immutable(&self) -> bool {
        match &self.kind {
            NodeKind::Reference(_) => true,
            NodeKind::Leaf(leaf) => leaf.immutable,
            _ => false,
        }
    }

    /// Whether the node is a reference
    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, NodeKind::Reference(_))
    }

    /// Reference data, if the node is a reference
    pub const fn as_reference(&self) -> Option<&ReferenceNode> {
        match &self.kind {
            NodeKind::Reference(reference) => Some(reference),
            _ => None,
        }
    }

    /// Whether the property this node fills is required
    pub fn is_required(&self) -> bool {
        self.property.as_ref().is_some_and(|p| p.required)
    }
}
