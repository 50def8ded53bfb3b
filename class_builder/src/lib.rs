//! # Class Builder
//!
//! Typed builder trees for interactively constructing object graphs.
//!
//! A [`BuilderTree`] mirrors the shape of a target type described by a
//! [`TypeResolver`]: beans with one slot per property, collections, maps, leaves
//! and references aliasing other slots of the same tree. Slots are expanded
//! lazily, populated from property defaults, reset to fresh nodes, and finally
//! turned into an [`ObjectGraph`] by the [`Materializer`], which keeps shared and
//! self-referencing objects as single objects and writes them with `"@id"` tags.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use class_builder::{BuilderTree, Materializer, RegistryResolver, SlotKey};
//! use serde_json::json;
//!
//! # fn main() -> class_builder::Result<()> {
//! let resolver = RegistryResolver::from_json(json!({
//!     "demo::Note": { "kind": "Struct", "properties": { "text": "String", "with": "demo::Note" } }
//! }))?;
//! let mut tree = BuilderTree::new(Arc::new(resolver), "demo::Note")?;
//! let text = tree.child_or_create(tree.root(), &SlotKey::field("text"))?;
//! tree.set_text(text, "Hello")?;
//! let json = Materializer::materialize_root(&tree)?.to_json()?;
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod constants;
mod error;
mod graph;
mod leaf;
mod log;
mod materialize;
mod node;
mod reference;
mod resolver;
mod scan;
#[cfg(test)]
mod test_registry;
mod tree;
mod type_kind;
mod type_name;

pub use codec::{DateTimeCodec, TextCodec, UuidCodec, builtin_codec};
pub use config::BuilderConfig;
pub use constants::{CONFIG_ENV_VAR, ID_TAG, NULL_PREVIEW, TYPE_TAG};
pub use error::{Error, Result};
pub use graph::{GraphField, GraphObject, GraphValue, ObjectBody, ObjectGraph, ObjectId};
pub use log::{DynamicFilter, TracingLevel};
pub use materialize::{Materializer, materialize_into};
pub use node::{
    BeanNode, BuilderNode, CollectionNode, ElementId, LeafNode, MapEntry, MapNode, NodeId,
    NodeKind, NodeKindTag, ReferenceNode, SlotKey,
};
pub use reference::{Candidate, ReferenceResolver};
pub use resolver::{PropertyMetadata, RegistryResolver, SchemaField, TypeDescription, TypeResolver};
pub use scan::{
    BackgroundScan, SearchOutcome, SnapshotNode, TreeSnapshot, spawn_candidate_search,
    spawn_subtype_discovery,
};
pub use tree::{BuilderTree, ChangeEvent, ChangeKind, SubscriptionId};
pub use type_kind::TypeKind;
pub use type_name::{PrimitiveKind, TypeName};
