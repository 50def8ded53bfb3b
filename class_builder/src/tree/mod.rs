//! The builder tree: owner of every node of one editing session
//!
//! Nodes live in an arena keyed by [`NodeId`]. Parents hold slots, children hold
//! their parent id and key, and the root sits in the single slot of the
//! [`NodeId::SENTINEL`]. All edits go through the tree so that
//!
//! - a failed operation leaves the tree exactly as it was,
//! - every slot change bumps the revision and queues a [`ChangeEvent`],
//! - references whose target slot emptied are detached before listeners run.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::codec::TextCodec;
use crate::config::BuilderConfig;
use crate::constants::{ID_TAG, NULL_PREVIEW, TYPE_TAG};
use crate::error::{Error, Result};
use crate::leaf;
use crate::node::{
    BeanNode, BuilderNode, CollectionNode, ElementId, LeafNode, MapEntry, MapNode, NodeId,
    NodeKind, ReferenceNode, SlotKey,
};
use crate::resolver::{PropertyMetadata, TypeDescription, TypeResolver};
use crate::type_kind::TypeKind;
use crate::type_name::TypeName;

/// Handle returned by [`BuilderTree::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What changed on a node
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// A leaf value was edited
    ValueChanged {
        /// Value before the edit
        old: Value,
        /// Value after the edit
        new: Value,
    },
    /// A slot now holds a different node, or became empty
    SlotChanged {
        /// The slot
        key: SlotKey,
        /// Previous occupant, already destroyed
        old: Option<NodeId>,
        /// New occupant
        new: Option<NodeId>,
    },
    /// A collection element or map entry was added
    SlotAdded {
        /// Key of the new element, or the value key of the new entry
        key: SlotKey,
    },
    /// A collection element or map entry was removed
    SlotRemoved {
        /// Key of the removed element, or the value key of the removed entry
        key: SlotKey,
    },
}

/// Notification delivered synchronously once a mutation has completed
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Node whose value or slots changed
    pub node: NodeId,
    /// What changed
    pub kind: ChangeKind,
}

type Listener = Box<dyn FnMut(&ChangeEvent)>;

/// Type and metadata a slot declares
#[derive(Debug, Clone)]
pub(crate) struct SlotSpec {
    pub(crate) declared: TypeName,
    pub(crate) property: Option<PropertyMetadata>,
}

/// Everything needed to build one node
struct Seed<'a> {
    declared: TypeName,
    key:      SlotKey,
    parent:   NodeId,
    property: Option<PropertyMetadata>,
    initial:  Option<&'a Value>,
    concrete: Option<TypeName>,
}

impl<'a> Seed<'a> {
    fn new(spec: SlotSpec, key: SlotKey, parent: NodeId, initial: Option<&'a Value>) -> Self {
        Self {
            declared: spec.declared,
            key,
            parent,
            property: spec.property,
            initial,
            concrete: None,
        }
    }
}

/// A mutable tree of typed builder nodes rooted at one node
pub struct BuilderTree {
    resolver:          Arc<dyn TypeResolver>,
    config:            BuilderConfig,
    nodes:             HashMap<NodeId, BuilderNode>,
    root:              NodeId,
    root_key:          SlotKey,
    root_type:         TypeName,
    descriptions:      HashMap<TypeName, Arc<TypeDescription>>,
    references:        BTreeSet<NodeId>,
    listeners:         HashMap<NodeId, Vec<(SubscriptionId, Listener)>>,
    pending:           Vec<ChangeEvent>,
    next_node:         u64,
    next_element:      u64,
    next_subscription: u64,
    revision:          u64,
}

impl fmt::Debug for BuilderTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuilderTree")
            .field("root", &self.root)
            .field("root_type", &self.root_type)
            .field("nodes", &self.nodes.len())
            .field("references", &self.references)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl BuilderTree {
    /// Create a tree for `root_type` with the default configuration
    pub fn new(resolver: Arc<dyn TypeResolver>, root_type: impl Into<TypeName>) -> Result<Self> {
        Self::create(resolver, root_type.into(), BuilderConfig::default(), None)
    }

    /// Create a tree with an explicit configuration
    pub fn with_config(
        resolver: Arc<dyn TypeResolver>,
        root_type: impl Into<TypeName>,
        config: BuilderConfig,
    ) -> Result<Self> {
        Self::create(resolver, root_type.into(), config, None)
    }

    /// Create a tree whose root is populated from a JSON literal
    pub fn with_initial(
        resolver: Arc<dyn TypeResolver>,
        root_type: impl Into<TypeName>,
        config: BuilderConfig,
        initial: &Value,
    ) -> Result<Self> {
        Self::create(resolver, root_type.into(), config, Some(initial))
    }

    fn create(
        resolver: Arc<dyn TypeResolver>,
        root_type: TypeName,
        config: BuilderConfig,
        initial: Option<&Value>,
    ) -> Result<Self> {
        config.validate()?;
        let root_key = SlotKey::Root(root_type.short_name());
        let mut tree = Self {
            resolver,
            config,
            nodes: HashMap::new(),
            root: NodeId::SENTINEL,
            root_key: root_key.clone(),
            root_type: root_type.clone(),
            descriptions: HashMap::new(),
            references: BTreeSet::new(),
            listeners: HashMap::new(),
            pending: Vec::new(),
            next_node: 1,
            next_element: 0,
            next_subscription: 0,
            revision: 0,
        };
        let spec = SlotSpec {
            declared: root_type,
            property: None,
        };
        tree.root = tree.build_detached(Seed::new(spec, root_key, NodeId::SENTINEL, initial))?;
        debug!(
            root = %tree.root,
            root_type = %tree.root_type,
            nodes = tree.nodes.len(),
            "Created builder tree"
        );
        Ok(tree)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// The root node
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// Key of the single slot of the root sentinel
    pub const fn root_key(&self) -> &SlotKey {
        &self.root_key
    }

    /// Declared type of the root
    pub const fn root_type(&self) -> &TypeName {
        &self.root_type
    }

    /// Resolver the tree describes types with
    pub fn resolver(&self) -> &Arc<dyn TypeResolver> {
        &self.resolver
    }

    /// Active configuration
    pub const fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Incremented by every successful mutation
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of live nodes, references included
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Whether `id` names a live node
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Look up a live node
    pub fn node(&self, id: NodeId) -> Result<&BuilderNode> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()).into())
    }

    pub(crate) fn nodes(&self) -> impl Iterator<Item = &BuilderNode> {
        self.nodes.values()
    }

    /// Leaves and references
    pub fn is_leaf(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_leaf())
    }

    /// References and read-only leaves
    pub fn is_immutable(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_immutable())
    }

    /// Whether the property the node fills must be set for materialization
    pub fn is_required(&self, id: NodeId) -> Result<bool> {
        Ok(self.node(id)?.is_required())
    }

    /// Property metadata of the slot the node fills
    pub fn property(&self, id: NodeId) -> Result<Option<&PropertyMetadata>> {
        Ok(self.node(id)?.property())
    }

    /// Slots of a node in order; empty for leaves and references
    pub fn children(&self, id: NodeId) -> Result<Vec<(SlotKey, Option<NodeId>)>> {
        Ok(self.node(id)?.kind().slots())
    }

    /// Declared type of a slot
    pub fn child_type(&self, parent: NodeId, key: &SlotKey) -> Result<TypeName> {
        Ok(self.slot_spec(parent, key)?.declared)
    }

    /// Current occupant of a slot without creating anything
    pub fn child(&self, parent: NodeId, key: &SlotKey) -> Result<Option<NodeId>> {
        if parent.is_sentinel() {
            self.check_root_key(key)?;
            return Ok(Some(self.root));
        }
        let node = self.node(parent)?;
        node.kind()
            .slot(key)
            .ok_or_else(|| Self::unknown_slot(node, key).into())
    }

    /// The node a reference currently reads through to, or `id` itself for other nodes
    pub fn resolve(&self, id: NodeId) -> Result<NodeId> {
        let node = self.node(id)?;
        let Some(reference) = node.as_reference() else {
            return Ok(id);
        };
        self.reference_target(reference).ok_or_else(|| {
            Error::StaleReference(format!(
                "{id} refers to the empty slot '{}'",
                reference.target_key()
            ))
            .into()
        })
    }

    /// Value of a leaf, read through references; `None` for non-leaf nodes
    pub fn value(&self, id: NodeId) -> Result<Option<&Value>> {
        let target = self.resolve(id)?;
        match self.node(target)?.kind() {
            NodeKind::Leaf(leaf) => Ok(Some(leaf.value())),
            _ => Ok(None),
        }
    }

    fn check_root_key(&self, key: &SlotKey) -> Result<()> {
        if key == &self.root_key {
            return Ok(());
        }
        Err(Error::UnknownProperty {
            type_name: self.root_type.clone(),
            key:       key.to_string(),
            expected:  self.root_key.to_string(),
        }
        .into())
    }

    fn unknown_slot(node: &BuilderNode, key: &SlotKey) -> Error {
        Error::UnknownProperty {
            type_name: node.type_name().clone(),
            key:       key.to_string(),
            expected:  node.kind().expected_keys(),
        }
    }

    pub(crate) fn slot_spec(&self, parent: NodeId, key: &SlotKey) -> Result<SlotSpec> {
        if parent.is_sentinel() {
            self.check_root_key(key)?;
            return Ok(SlotSpec {
                declared: self.root_type.clone(),
                property: None,
            });
        }
        let node = self.node(parent)?;
        if node.kind().slot(key).is_none() {
            return Err(Self::unknown_slot(node, key).into());
        }
        let spec = match (node.kind(), key) {
            (NodeKind::Bean(bean), SlotKey::Field(name)) => {
                let property = bean
                    .description()
                    .property(name)
                    .ok_or_else(|| Self::unknown_slot(node, key))?;
                SlotSpec {
                    declared: property.type_name.clone(),
                    property: Some(property.clone()),
                }
            }
            (NodeKind::Collection(collection), SlotKey::Element(_)) => SlotSpec {
                declared: collection.element_type().clone(),
                property: None,
            },
            (NodeKind::Map(map), SlotKey::EntryKey(_)) => SlotSpec {
                declared: map.key_type().clone(),
                property: None,
            },
            (NodeKind::Map(map), SlotKey::EntryValue(_)) => SlotSpec {
                declared: map.value_type().clone(),
                property: None,
            },
            _ => return Err(Self::unknown_slot(node, key).into()),
        };
        Ok(spec)
    }

    pub(crate) fn reference_target(&self, reference: &ReferenceNode) -> Option<NodeId> {
        self.child(reference.target_parent(), reference.target_key())
            .ok()
            .flatten()
    }

    // ------------------------------------------------------------------------
    // Creation and reset
    // ------------------------------------------------------------------------

    /// Occupant of a slot, created with its default state when empty
    pub fn child_or_create(&mut self, parent: NodeId, key: &SlotKey) -> Result<NodeId> {
        self.create_child(parent, key, None)
    }

    /// Occupant of a slot, created from `initial` when empty
    ///
    /// `initial` is validated against the slot type even when the slot is already
    /// occupied, in which case the existing node is returned unchanged.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        key: &SlotKey,
        initial: Option<&Value>,
    ) -> Result<NodeId> {
        let spec = self.slot_spec(parent, key)?;
        if let Some(existing) = self.child(parent, key)? {
            if let Some(initial) = initial {
                let trial =
                    self.build_detached(Seed::new(spec, key.clone(), parent, Some(initial)))?;
                self.discard(trial);
            }
            return Ok(existing);
        }
        let child = self.build_detached(Seed::new(spec, key.clone(), parent, initial))?;
        self.set_slot(parent, key, Some(child))?;
        self.finish_mutation();
        trace!(parent = %parent, key = %key, child = %child, "Created child");
        Ok(child)
    }

    /// Fill an empty slot with a caller chosen concrete type, typically for abstract slots
    pub fn create_child_as(
        &mut self,
        parent: NodeId,
        key: &SlotKey,
        concrete: &TypeName,
    ) -> Result<NodeId> {
        let spec = self.slot_spec(parent, key)?;
        if !self.resolver.is_assignable(concrete, &spec.declared) {
            return Err(Error::mismatch(&spec.declared, concrete).into());
        }
        if let Some(existing) = self.child(parent, key)? {
            let existing_type = self.node(existing)?.type_name();
            if existing_type == concrete {
                return Ok(existing);
            }
            return Err(Error::StaleReference(format!(
                "slot '{key}' already holds a {existing_type}, reset it before choosing {concrete}"
            ))
            .into());
        }
        let mut seed = Seed::new(spec, key.clone(), parent, None);
        seed.concrete = Some(concrete.clone());
        let child = self.build_detached(seed)?;
        self.set_slot(parent, key, Some(child))?;
        self.finish_mutation();
        Ok(child)
    }

    /// Replace the occupant of a slot with a fresh default node, or empty it
    ///
    /// Fails with [`Error::StaleReference`] when `expected` is given and is not the
    /// live occupant. Resetting the root always recreates it.
    pub fn reset_child(
        &mut self,
        parent: NodeId,
        key: &SlotKey,
        expected: Option<NodeId>,
        restore_default: bool,
    ) -> Result<Option<NodeId>> {
        let spec = self.slot_spec(parent, key)?;
        let current = self.child(parent, key)?;
        if let Some(expected) = expected
            && current != Some(expected)
        {
            return Err(Error::StaleReference(format!(
                "slot '{key}' holds {}, expected {expected}",
                current.map_or_else(|| NULL_PREVIEW.to_string(), |id| id.to_string())
            ))
            .into());
        }

        if parent.is_sentinel() {
            let root = self.build_detached(Seed::new(spec, key.clone(), parent, None))?;
            let old = std::mem::replace(&mut self.root, root);
            self.destroy_subtree(old);
            self.record_change(ChangeEvent {
                node: NodeId::SENTINEL,
                kind: ChangeKind::SlotChanged {
                    key: key.clone(),
                    old: Some(old),
                    new: Some(root),
                },
            });
            self.finish_mutation();
            debug!(old = %old, new = %root, "Reset root");
            return Ok(Some(root));
        }

        let replacement = if restore_default {
            self.build_default(parent, key, spec)?
        } else {
            None
        };
        self.set_slot(parent, key, replacement)?;
        self.finish_mutation();
        debug!(
            parent = %parent,
            key = %key,
            restore_default,
            replacement = ?replacement,
            "Reset child"
        );
        Ok(replacement)
    }

    /// Default occupant of a slot after a reset or detach: the property's default
    /// literal, the zero value of an element or entry type, or nothing
    pub(crate) fn build_default(
        &mut self,
        parent: NodeId,
        key: &SlotKey,
        spec: SlotSpec,
    ) -> Result<Option<NodeId>> {
        match spec.property.clone() {
            Some(property) => {
                let mut created = Vec::new();
                self.build_property_default(&property, parent, 0, false, &mut created)
                    .inspect_err(|_| {
                        for id in &created {
                            self.nodes.remove(id);
                        }
                    })
            }
            None => Ok(Some(self.build_detached(Seed::new(
                spec,
                key.clone(),
                parent,
                None,
            ))?)),
        }
    }

    // ------------------------------------------------------------------------
    // Collections and maps
    // ------------------------------------------------------------------------

    /// Append an element; a JSON `null` initial value appends an empty slot
    pub fn push_element(&mut self, collection: NodeId, initial: Option<&Value>) -> Result<ElementId> {
        let element_type = match self.node(collection)?.kind() {
            NodeKind::Collection(node) => node.element_type().clone(),
            other => {
                return Err(Error::ContractViolation(format!(
                    "{collection} is a {}, not a collection",
                    other.tag()
                ))
                .into());
            }
        };
        let element = self.allocate_element();
        let key = SlotKey::Element(element);
        let child = match initial {
            Some(Value::Null) => None,
            initial => {
                let spec = SlotSpec {
                    declared: element_type,
                    property: None,
                };
                Some(self.build_detached(Seed::new(spec, key.clone(), collection, initial))?)
            }
        };
        if let Some(NodeKind::Collection(node)) = self.nodes.get_mut(&collection).map(|n| &mut n.kind)
        {
            node.elements.push((element, child));
        }
        self.record_change(ChangeEvent {
            node: collection,
            kind: ChangeKind::SlotAdded { key },
        });
        self.finish_mutation();
        Ok(element)
    }

    /// Remove an element; the keys of the remaining elements do not change
    pub fn remove_element(&mut self, collection: NodeId, element: ElementId) -> Result<()> {
        let key = SlotKey::Element(element);
        let node = self
            .nodes
            .get_mut(&collection)
            .ok_or_else(|| Error::UnknownNode(collection.to_string()))?;
        let removed = match &mut node.kind {
            NodeKind::Collection(items) => items
                .elements
                .iter()
                .position(|(id, _)| *id == element)
                .map(|position| items.elements.remove(position)),
            _ => None,
        };
        let Some((_, child)) = removed else {
            return Err(Self::unknown_slot(node, &key).into());
        };
        if let Some(child) = child {
            self.destroy_subtree(child);
        }
        self.record_change(ChangeEvent {
            node: collection,
            kind: ChangeKind::SlotRemoved { key },
        });
        self.finish_mutation();
        Ok(())
    }

    /// Append a map entry. The key node is always created; the value is created
    /// from `value_initial`, or with its zero value when the value type is primitive.
    pub fn insert_entry(
        &mut self,
        map: NodeId,
        key_initial: Option<&Value>,
        value_initial: Option<&Value>,
    ) -> Result<ElementId> {
        let (key_type, value_type) = match self.node(map)?.kind() {
            NodeKind::Map(node) => (node.key_type().clone(), node.value_type().clone()),
            other => {
                return Err(Error::ContractViolation(format!(
                    "{map} is a {}, not a map",
                    other.tag()
                ))
                .into());
            }
        };
        let entry = self.allocate_element();
        let key_spec = SlotSpec {
            declared: key_type,
            property: None,
        };
        let key_node =
            self.build_detached(Seed::new(key_spec, SlotKey::EntryKey(entry), map, key_initial))?;

        let build_value = match value_initial {
            Some(Value::Null) => false,
            Some(_) => true,
            None => value_type.is_primitive(),
        };
        let value_node = if build_value {
            let value_spec = SlotSpec {
                declared: value_type,
                property: None,
            };
            let seed = Seed::new(value_spec, SlotKey::EntryValue(entry), map, value_initial);
            match self.build_detached(seed) {
                Ok(node) => Some(node),
                Err(e) => {
                    self.discard(key_node);
                    return Err(e);
                }
            }
        } else {
            None
        };

        if let Some(NodeKind::Map(node)) = self.nodes.get_mut(&map).map(|n| &mut n.kind) {
            node.entries.push(MapEntry {
                id:    entry,
                key:   Some(key_node),
                value: value_node,
            });
        }
        self.record_change(ChangeEvent {
            node: map,
            kind: ChangeKind::SlotAdded {
                key: SlotKey::EntryValue(entry),
            },
        });
        self.finish_mutation();
        Ok(entry)
    }

    /// Remove a map entry with both of its nodes
    pub fn remove_entry(&mut self, map: NodeId, entry: ElementId) -> Result<()> {
        let key = SlotKey::EntryValue(entry);
        let node = self
            .nodes
            .get_mut(&map)
            .ok_or_else(|| Error::UnknownNode(map.to_string()))?;
        let removed = match &mut node.kind {
            NodeKind::Map(items) => items
                .entries
                .iter()
                .position(|e| e.id == entry)
                .map(|position| items.entries.remove(position)),
            _ => None,
        };
        let Some(removed) = removed else {
            return Err(Self::unknown_slot(node, &key).into());
        };
        for child in [removed.key, removed.value].into_iter().flatten() {
            self.destroy_subtree(child);
        }
        self.record_change(ChangeEvent {
            node: map,
            kind: ChangeKind::SlotRemoved { key },
        });
        self.finish_mutation();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Leaf edits
    // ------------------------------------------------------------------------

    /// Replace the value of a leaf with a JSON literal
    pub fn set_value(&mut self, id: NodeId, value: &Value) -> Result<()> {
        let (description, codec) = self.editable_leaf(id)?;
        let normalized = leaf::normalize(&description, codec.as_deref(), value)?;
        self.apply_value(id, normalized);
        Ok(())
    }

    /// Replace the value of a leaf by parsing user text
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<()> {
        let (description, codec) = self.editable_leaf(id)?;
        let parsed = leaf::parse_text(&description, codec.as_deref(), text)?;
        self.apply_value(id, parsed);
        Ok(())
    }

    fn editable_leaf(
        &mut self,
        id: NodeId,
    ) -> Result<(Arc<TypeDescription>, Option<Arc<dyn TextCodec>>)> {
        let node = self.node(id)?;
        let codec = match node.kind() {
            NodeKind::Leaf(leaf) if !leaf.immutable => leaf.codec.clone(),
            NodeKind::Leaf(_) | NodeKind::Reference(_) => {
                return Err(Error::ImmutableNode(self.path(id)?).into());
            }
            other => {
                return Err(Error::ContractViolation(format!(
                    "{id} is a {}, only leaves hold values",
                    other.tag()
                ))
                .into());
            }
        };
        let type_name = node.type_name().clone();
        let description = self.describe(&type_name)?;
        Ok((description, codec))
    }

    fn apply_value(&mut self, id: NodeId, value: Value) {
        let Some(NodeKind::Leaf(leaf)) = self.nodes.get_mut(&id).map(|n| &mut n.kind) else {
            return;
        };
        if leaf.value == value {
            return;
        }
        let old = std::mem::replace(&mut leaf.value, value.clone());
        trace!(node = %id, old = %old, new = %value, "Leaf value changed");
        self.record_change(ChangeEvent {
            node: id,
            kind: ChangeKind::ValueChanged { old, new: value },
        });
        self.finish_mutation();
    }

    // ------------------------------------------------------------------------
    // Change notification
    // ------------------------------------------------------------------------

    /// Receive every [`ChangeEvent`] of `id` until the node is destroyed or the
    /// subscription is dropped
    pub fn subscribe(
        &mut self,
        id: NodeId,
        listener: impl FnMut(&ChangeEvent) + 'static,
    ) -> Result<SubscriptionId> {
        if !id.is_sentinel() {
            self.node(id)?;
        }
        let subscription = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners
            .entry(id)
            .or_default()
            .push((subscription, Box::new(listener)));
        Ok(subscription)
    }

    /// Drop a subscription; `false` when it was already gone
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let mut removed = false;
        for listeners in self.listeners.values_mut() {
            let before = listeners.len();
            listeners.retain(|(id, _)| *id != subscription);
            removed |= listeners.len() != before;
        }
        self.listeners.retain(|_, listeners| !listeners.is_empty());
        removed
    }

    fn record_change(&mut self, event: ChangeEvent) {
        self.revision += 1;
        self.pending.push(event);
    }

    /// Detach dangling references, then deliver queued events
    fn finish_mutation(&mut self) {
        self.detach_dangling_references();
        let events = std::mem::take(&mut self.pending);
        for event in &events {
            if let Some(listeners) = self.listeners.get_mut(&event.node) {
                for (_, listener) in listeners.iter_mut() {
                    listener(event);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Addressing and previews
    // ------------------------------------------------------------------------

    /// Keys from the root down to `id`, root key included
    pub fn path_segments(&self, id: NodeId) -> Result<Vec<SlotKey>> {
        let mut segments = Vec::new();
        let mut current = id;
        for _ in 0..=self.nodes.len() {
            let node = self.node(current)?;
            segments.push(node.key().clone());
            if node.parent().is_sentinel() {
                segments.reverse();
                return Ok(segments);
            }
            current = node.parent();
        }
        Err(Error::ContractViolation(format!("parent chain of {id} does not reach the root")).into())
    }

    /// Human readable breadcrumb of a node
    pub fn path(&self, id: NodeId) -> Result<String> {
        Ok(self
            .path_segments(id)?
            .iter()
            .join(&self.config.path_separator))
    }

    /// Strict ancestors of a node, nearest first
    pub fn ancestors(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut ancestors = Vec::new();
        let mut current = self.node(id)?.parent();
        for _ in 0..=self.nodes.len() {
            if current.is_sentinel() {
                return Ok(ancestors);
            }
            ancestors.push(current);
            current = self.node(current)?.parent();
        }
        Err(Error::ContractViolation(format!("parent chain of {id} does not reach the root")).into())
    }

    /// Whether `ancestor` owns `id`, directly or transitively
    pub fn is_descendant_of(&self, id: NodeId, ancestor: NodeId) -> Result<bool> {
        Ok(self.ancestors(id)?.contains(&ancestor))
    }

    /// Nodes of the subtree rooted at `from` in depth-first pre-order
    ///
    /// References appear as nodes but are not followed.
    pub fn depth_first(&self, from: NodeId) -> Result<Vec<NodeId>> {
        let mut order = Vec::new();
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            order.push(id);
            stack.extend(
                node.kind()
                    .slots()
                    .into_iter()
                    .rev()
                    .filter_map(|(_, child)| child),
            );
        }
        Ok(order)
    }

    /// One line summary of a node's value
    pub fn preview(&self, id: NodeId) -> Result<String> {
        let node = self.node(id)?;
        let preview = match node.kind() {
            NodeKind::Leaf(leaf) => leaf::to_text(leaf.value(), leaf.codec.as_deref()),
            NodeKind::Bean(bean) => bean
                .slots
                .iter()
                .map(|(name, child)| -> Result<String> {
                    Ok(format!("{name}: {}", self.slot_preview(*child)?))
                })
                .collect::<Result<Vec<_>>>()?
                .join(", "),
            NodeKind::Collection(collection) => {
                let elements = collection
                    .elements
                    .iter()
                    .map(|(_, child)| self.slot_preview(*child))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                if collection.is_ordered() {
                    format!("[{elements}]")
                } else {
                    format!("{{{elements}}}")
                }
            }
            NodeKind::Map(map) => format!(
                "{{{}}}",
                map.entries
                    .iter()
                    .map(|entry| -> Result<String> {
                        Ok(format!(
                            "{}={}",
                            self.slot_preview(entry.key)?,
                            self.slot_preview(entry.value)?
                        ))
                    })
                    .collect::<Result<Vec<_>>>()?
                    .join(", ")
            ),
            NodeKind::Reference(reference) => {
                if reference.target_parent().is_sentinel() {
                    format!("Ref to {}", reference.target_key())
                } else {
                    format!(
                        "Ref to {} property of {}",
                        reference.target_key(),
                        self.node(reference.target_parent())?.key()
                    )
                }
            }
        };
        Ok(preview)
    }

    fn slot_preview(&self, child: Option<NodeId>) -> Result<String> {
        child.map_or_else(|| Ok(NULL_PREVIEW.to_string()), |id| self.preview(id))
    }

    // ------------------------------------------------------------------------
    // Slot plumbing
    // ------------------------------------------------------------------------

    fn allocate_node(&mut self) -> NodeId {
        let id = NodeId::new(self.next_node);
        self.next_node += 1;
        id
    }

    fn allocate_element(&mut self) -> ElementId {
        let id = ElementId::new(self.next_element);
        self.next_element += 1;
        id
    }

    /// Store `new` in a slot and destroy the previous occupant
    fn set_slot(&mut self, parent: NodeId, key: &SlotKey, new: Option<NodeId>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&parent)
            .ok_or_else(|| Error::UnknownNode(parent.to_string()))?;
        let Some(slot) = node.kind.slot_mut(key) else {
            return Err(Self::unknown_slot(node, key).into());
        };
        let old = std::mem::replace(slot, new);
        if let Some(old) = old {
            self.destroy_subtree(old);
        }
        self.record_change(ChangeEvent {
            node: parent,
            kind: ChangeKind::SlotChanged {
                key: key.clone(),
                old,
                new,
            },
        });
        Ok(())
    }

    /// Remove a node and everything it owns
    fn destroy_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            stack.extend(node.kind.slots().into_iter().filter_map(|(_, child)| child));
            self.references.remove(&current);
            self.listeners.remove(&current);
        }
    }

    /// Destroy a node that was never placed in a slot
    fn discard(&mut self, id: NodeId) {
        self.destroy_subtree(id);
    }

    /// Install a reference node in a slot, replacing its occupant
    pub(crate) fn install_reference(
        &mut self,
        owner_parent: NodeId,
        owner_key: &SlotKey,
        target_parent: NodeId,
        target_key: SlotKey,
        target_type: TypeName,
    ) -> Result<NodeId> {
        let spec = self.slot_spec(owner_parent, owner_key)?;
        let id = self.allocate_node();
        self.nodes.insert(
            id,
            BuilderNode {
                id,
                key: owner_key.clone(),
                parent: owner_parent,
                declared_type: spec.declared,
                type_name: target_type,
                property: spec.property,
                kind: NodeKind::Reference(ReferenceNode {
                    target_parent,
                    target_key,
                }),
            },
        );
        self.references.insert(id);
        if let Err(e) = self.set_slot(owner_parent, owner_key, Some(id)) {
            self.discard(id);
            return Err(e);
        }
        self.finish_mutation();
        Ok(id)
    }

    fn reference_is_live(&self, id: NodeId) -> bool {
        let Some(reference) = self.nodes.get(&id).and_then(BuilderNode::as_reference) else {
            return false;
        };
        self.reference_target(reference).is_some_and(|target| {
            target != id
                && self
                    .nodes
                    .get(&target)
                    .is_some_and(|node| !node.is_reference())
        })
    }

    /// Revert every reference whose target slot is empty, gone, or holds a reference
    fn detach_dangling_references(&mut self) {
        for _ in 0..=self.references.len() {
            let dangling = self
                .references
                .iter()
                .copied()
                .filter(|id| !self.reference_is_live(*id))
                .collect::<Vec<_>>();
            if dangling.is_empty() {
                return;
            }
            for reference in dangling {
                let Some(node) = self.nodes.get(&reference) else {
                    self.references.remove(&reference);
                    continue;
                };
                let (owner, key) = (node.parent(), node.key().clone());
                let replacement = match self.slot_spec(owner, &key) {
                    Ok(spec) => self.build_default(owner, &key, spec).unwrap_or_else(|e| {
                        warn!(owner = %owner, key = %key, error = %e, "Default unavailable, leaving slot empty");
                        None
                    }),
                    Err(_) => None,
                };
                debug!(reference = %reference, owner = %owner, key = %key, "Detaching dangling reference");
                if let Err(e) = self.set_slot(owner, &key, replacement) {
                    warn!(reference = %reference, error = %e, "Failed to detach reference");
                    self.references.remove(&reference);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Node construction
    // ------------------------------------------------------------------------

    pub(crate) fn describe(&mut self, type_name: &TypeName) -> Result<Arc<TypeDescription>> {
        if let Some(description) = self.descriptions.get(type_name) {
            return Ok(Arc::clone(description));
        }
        let description = Arc::new(self.resolver.describe(type_name)?);
        self.descriptions
            .insert(type_name.clone(), Arc::clone(&description));
        Ok(description)
    }

    /// Build a node outside of any slot, removing everything created on failure
    fn build_detached(&mut self, seed: Seed<'_>) -> Result<NodeId> {
        let mut created = Vec::new();
        self.build_node(seed, 0, &mut created).inspect_err(|_| {
            for id in &created {
                self.nodes.remove(id);
            }
        })
    }

    fn build_node(&mut self, seed: Seed<'_>, depth: usize, created: &mut Vec<NodeId>) -> Result<NodeId> {
        if depth > self.config.max_depth {
            return Err(Error::ContractViolation(format!(
                "maximum depth {} exceeded while building {}",
                self.config.max_depth, seed.declared
            ))
            .into());
        }
        let (type_name, description) = self.concrete_description(&seed)?;
        let id = self.allocate_node();
        let type_kind = description.kind;
        let kind = match type_kind {
            TypeKind::Value | TypeKind::Enum => {
                NodeKind::Leaf(self.build_leaf(&description, seed.property.as_ref(), seed.initial)?)
            }
            TypeKind::List | TypeKind::Set => {
                NodeKind::Collection(self.build_collection(id, &description, seed.initial, depth, created)?)
            }
            TypeKind::Map => NodeKind::Map(self.build_map(id, &description, seed.initial, depth, created)?),
            TypeKind::Struct | TypeKind::Abstract => {
                NodeKind::Bean(self.build_bean(id, description, seed.initial, depth, created)?)
            }
        };
        self.nodes.insert(
            id,
            BuilderNode {
                id,
                key: seed.key,
                parent: seed.parent,
                declared_type: seed.declared,
                type_name,
                property: seed.property,
                kind,
            },
        );
        created.push(id);
        Ok(id)
    }

    /// Concrete type of a new node: the caller's choice, an `@type` tag in the
    /// initial object, or the resolver's pick for abstract types
    fn concrete_description(&mut self, seed: &Seed<'_>) -> Result<(TypeName, Arc<TypeDescription>)> {
        let declared = &seed.declared;
        let description = self.describe(declared)?;
        let is_bean = matches!(description.kind, TypeKind::Struct | TypeKind::Abstract);
        let tagged = match seed.initial.filter(|_| is_bean).and_then(|initial| initial.get(TYPE_TAG)) {
            Some(Value::String(tag)) => Some(TypeName::from(tag)),
            Some(other) => {
                return Err(Error::invalid_value(declared, format!("'{TYPE_TAG}' must be a type name, got {other}")).into());
            }
            None => None,
        };
        let concrete = match seed.concrete.clone().or(tagged) {
            Some(concrete) if &concrete == declared => return Ok((concrete, description)),
            Some(concrete) => {
                if !self.resolver.is_assignable(&concrete, declared) {
                    return Err(Error::mismatch(declared, concrete).into());
                }
                concrete
            }
            None if description.is_abstract() => self.resolver.resolve_concrete_subtype(declared)?,
            None => return Ok((declared.clone(), description)),
        };
        let concrete_description = self.describe(&concrete)?;
        if concrete_description.is_abstract() {
            return Err(Error::AmbiguousType {
                type_name:  concrete,
                candidates: Vec::new(),
            }
            .into());
        }
        debug!(declared = %declared, concrete = %concrete, "Resolved concrete type");
        Ok((concrete, concrete_description))
    }

    fn build_leaf(
        &self,
        description: &TypeDescription,
        property: Option<&PropertyMetadata>,
        initial: Option<&Value>,
    ) -> Result<LeafNode> {
        let codec = self.resolver.codec_for(&description.type_name);
        let value = match initial {
            Some(value) => leaf::normalize(description, codec.as_deref(), value)?,
            None => leaf::zero_value(description, codec.as_deref()),
        };
        Ok(LeafNode {
            value,
            immutable: property.is_some_and(|p| p.read_only),
            codec,
            variants: description.variants.clone(),
        })
    }

    fn build_bean(
        &mut self,
        id: NodeId,
        description: Arc<TypeDescription>,
        initial: Option<&Value>,
        depth: usize,
        created: &mut Vec<NodeId>,
    ) -> Result<BeanNode> {
        let fields = match initial {
            None => None,
            Some(Value::Object(fields)) => Some(fields),
            Some(other) => return Err(Error::mismatch(&description.type_name, leaf::json_type(other)).into()),
        };
        if let Some(unknown) = fields.into_iter().flat_map(|f| f.keys()).find(|name| {
            name.as_str() != TYPE_TAG && name.as_str() != ID_TAG && description.property(name).is_none()
        }) {
            return Err(Error::UnknownProperty {
                type_name: description.type_name.clone(),
                key:       unknown.clone(),
                expected:  description.property_names(),
            }
            .into());
        }

        let mut slots = Vec::with_capacity(description.properties.len());
        for property in &description.properties {
            let explicit = fields.and_then(|f| f.get(&property.name));
            let child = match explicit {
                Some(value) if !value.is_null() => {
                    let seed = Seed {
                        declared: property.type_name.clone(),
                        key:      SlotKey::Field(property.name.clone()),
                        parent:   id,
                        property: Some(property.clone()),
                        initial:  Some(value),
                        concrete: None,
                    };
                    Some(self.build_node(seed, depth + 1, created)?)
                }
                Some(_) if !property.type_name.is_primitive() => None,
                _ => self.build_property_default(property, id, depth + 1, true, created)?,
            };
            slots.push((property.name.clone(), child));
        }
        Ok(BeanNode { description, slots })
    }

    /// Node for a property's default literal. A fresh bean also fills primitive
    /// properties without a literal with their zero value; resets do not.
    /// An unusable default literal is logged and leaves the slot empty.
    fn build_property_default(
        &mut self,
        property: &PropertyMetadata,
        parent: NodeId,
        depth: usize,
        zero_primitives: bool,
        created: &mut Vec<NodeId>,
    ) -> Result<Option<NodeId>> {
        let zero_fill = zero_primitives && property.type_name.is_primitive();
        if !property.has_default() && !zero_fill {
            return Ok(None);
        }
        let seed = Seed {
            declared: property.type_name.clone(),
            key:      SlotKey::Field(property.name.clone()),
            parent,
            property: Some(property.clone()),
            initial:  property.default.as_ref(),
            concrete: None,
        };
        let mut attempt = Vec::new();
        match self.build_node(seed, depth, &mut attempt) {
            Ok(id) => {
                created.extend(attempt);
                Ok(Some(id))
            }
            Err(e) if matches!(e.current_context(), Error::ContractViolation(_)) => {
                created.extend(attempt);
                Err(e)
            }
            Err(e) => {
                for id in &attempt {
                    self.nodes.remove(id);
                }
                warn!(
                    property = %property.name,
                    type_name = %property.type_name,
                    error = %e,
                    "Ignoring unusable default literal"
                );
                Ok(None)
            }
        }
    }

    fn build_collection(
        &mut self,
        id: NodeId,
        description: &TypeDescription,
        initial: Option<&Value>,
        depth: usize,
        created: &mut Vec<NodeId>,
    ) -> Result<CollectionNode> {
        let element_type = description.element_type.clone().ok_or_else(|| {
            Error::schema_for_type(&description.type_name, "build_collection", "missing element type")
        })?;
        let mut elements = Vec::new();
        match initial {
            None => {}
            Some(Value::Array(items)) => {
                for item in items {
                    let element = self.allocate_element();
                    let child = if item.is_null() {
                        None
                    } else {
                        let seed = Seed {
                            declared: element_type.clone(),
                            key:      SlotKey::Element(element),
                            parent:   id,
                            property: None,
                            initial:  Some(item),
                            concrete: None,
                        };
                        Some(self.build_node(seed, depth + 1, created)?)
                    };
                    elements.push((element, child));
                }
            }
            Some(other) => return Err(Error::mismatch(&description.type_name, leaf::json_type(other)).into()),
        }
        Ok(CollectionNode {
            element_type,
            ordered: description.kind == TypeKind::List,
            elements,
        })
    }

    fn build_map(
        &mut self,
        id: NodeId,
        description: &TypeDescription,
        initial: Option<&Value>,
        depth: usize,
        created: &mut Vec<NodeId>,
    ) -> Result<MapNode> {
        let (Some(key_type), Some(value_type)) = (description.key_type.clone(), description.value_type.clone())
        else {
            return Err(
                Error::schema_for_type(&description.type_name, "build_map", "missing key or value type").into(),
            );
        };
        let pairs: Vec<(Value, Value)> = match initial {
            None => Vec::new(),
            Some(Value::Object(fields)) => {
                let key_description = self.describe(&key_type)?;
                if !key_description.is_primitive_like() {
                    return Err(Error::mismatch(&key_type, TypeName::from("json object key")).into());
                }
                let codec = self.resolver.codec_for(&key_type);
                fields
                    .iter()
                    .map(|(key, value)| -> Result<(Value, Value)> {
                        let key = leaf::parse_text(&key_description, codec.as_deref(), key)?;
                        Ok((key, value.clone()))
                    })
                    .collect::<Result<_>>()?
            }
            Some(Value::Array(pairs)) => pairs
                .iter()
                .map(|pair| -> Result<(Value, Value)> {
                    match pair.as_array().map(Vec::as_slice) {
                        Some([key, value]) => Ok((key.clone(), value.clone())),
                        _ => Err(Error::mismatch(&description.type_name, leaf::json_type(pair)).into()),
                    }
                })
                .collect::<Result<_>>()?,
            Some(other) => return Err(Error::mismatch(&description.type_name, leaf::json_type(other)).into()),
        };

        let mut entries = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let entry = self.allocate_element();
            let key_seed = Seed {
                declared: key_type.clone(),
                key:      SlotKey::EntryKey(entry),
                parent:   id,
                property: None,
                initial:  Some(&key),
                concrete: None,
            };
            let key_node = self.build_node(key_seed, depth + 1, created)?;
            let value_node = if value.is_null() {
                None
            } else {
                let value_seed = Seed {
                    declared: value_type.clone(),
                    key:      SlotKey::EntryValue(entry),
                    parent:   id,
                    property: None,
                    initial:  Some(&value),
                    concrete: None,
                };
                Some(self.build_node(value_seed, depth + 1, created)?)
            };
            entries.push(MapEntry {
                id:    entry,
                key:   Some(key_node),
                value: value_node,
            });
        }
        Ok(MapNode {
            key_type,
            value_type,
            entries,
        })
    }
}
