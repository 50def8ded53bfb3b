//! Category of type for quick identification and processing
//!
//! These correspond to the "kind" field of a type registry schema entry and decide
//! which node variant a builder tree creates for a slot.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumString};

use crate::resolver::SchemaField;
use crate::type_name::TypeName;

/// Kind of a registered type, deciding the node variant built for it
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "PascalCase")]
#[strum(serialize_all = "PascalCase")]
pub enum TypeKind {
    /// Interface or abstract type, must be resolved to a concrete subtype
    Abstract,
    /// Enum type, edited as a leaf holding a variant name
    Enum,
    /// Ordered sequence type (`Vec`, `VecDeque`, ...)
    List,
    /// Map type (`HashMap`, `BTreeMap`, etc.)
    Map,
    /// Unordered sequence type (`HashSet`, `BTreeSet`, etc.)
    Set,
    /// Regular struct type
    Struct,
    /// Value type (primitive types like i32, f32, bool, String, or codec backed types)
    Value,
}

impl TypeKind {
    /// Extract `TypeKind` from a registry schema with fallback to `Struct`
    pub fn from_schema(schema: &Value, type_name: &TypeName) -> Self {
        schema
            .get(SchemaField::Kind.as_ref())
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| {
                tracing::warn!(
                    type_name = %type_name,
                    "Type has missing or invalid 'kind' field in registry schema, defaulting to TypeKind::Struct"
                );
                Self::Struct
            })
    }

    /// Leaf kinds are edited in place and have no navigable children
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Value | Self::Enum)
    }

    /// Collection-like kinds become collection nodes
    pub const fn is_collection_like(self) -> bool {
        matches!(self, Self::List | Self::Set)
    }
}
