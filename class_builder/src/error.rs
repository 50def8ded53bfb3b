use error_stack::Report;
use thiserror::Error;

use crate::type_name::TypeName;

// Error message prefixes
const MSG_CANNOT_PREFIX: &str = "Cannot";
const MSG_INVALID_PREFIX: &str = "Invalid";

/// Result type for the `class_builder` library
pub type Result<T> = std::result::Result<T, Report<Error>>;

/// Every recoverable failure a builder tree operation can report.
///
/// A failed operation never leaves a partially mutated tree behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// An abstract type has no concrete subtype that can be picked automatically
    #[error("Cannot determine a concrete type for {type_name}, candidates: {candidates:?}")]
    AmbiguousType {
        /// The abstract type that was asked for
        type_name:  TypeName,
        /// Concrete subtypes known to the resolver, empty when none exist
        candidates: Vec<TypeName>,
    },

    /// A background scan was cancelled before it completed
    #[error("Scan cancelled: {0}")]
    Cancelled(String),

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A contract the caller or the tree itself must uphold was broken
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Binding a reference would create a forbidden cycle or chain
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    /// The node cannot be edited
    #[error("Node {0} is immutable")]
    ImmutableNode(String),

    /// A literal could not be parsed or validated for a leaf type
    #[error("Invalid value for {type_name}: {reason}")]
    InvalidValue {
        /// Type of the leaf being edited
        type_name: TypeName,
        /// Why the value was rejected
        reason:    String,
    },

    /// Materializing a node failed for a reason other than a missing required slot
    #[error("Failed to materialize {path}: {reason}")]
    Materialization {
        /// Breadcrumb of the failing node
        path:   String,
        /// What went wrong
        reason: String,
    },

    /// A required property was still unset at materialization time
    #[error("Missing required property '{property}' at {path}")]
    MissingRequiredProperty {
        /// Breadcrumb of the bean owning the property
        path:     String,
        /// Name of the unset property
        property: String,
    },

    /// Type registry content could not be interpreted
    #[error("Schema processing error: {0}")]
    SchemaProcessing(String),

    /// The caller's view of a slot no longer matches the tree
    #[error("Stale reference: {0}")]
    StaleReference(String),

    /// A value or node does not fit the declared type of a slot
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Declared type of the slot
        expected: TypeName,
        /// Type of the offered value or node
        actual:   TypeName,
    },

    /// A node id does not name a live node in this tree
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// A key is not a valid slot of the node
    #[error("{type_name} has no slot '{key}', expected one of: {expected}")]
    UnknownProperty {
        /// Type of the node that was addressed
        type_name: TypeName,
        /// The offending key
        key:       String,
        /// Human readable list of valid keys
        expected:  String,
    },
}

impl Error {
    /// Create a "Cannot X" cycle error
    pub fn cycle(action: &str, reason: impl std::fmt::Display) -> Self {
        Self::CycleDetected(format!("{MSG_CANNOT_PREFIX} {action}: {reason}"))
    }

    /// Create an "Invalid X" value error
    pub fn invalid_value(type_name: &TypeName, reason: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            type_name: type_name.clone(),
            reason:    format!("{MSG_INVALID_PREFIX} literal: {reason}"),
        }
    }

    /// Create a type mismatch error
    pub fn mismatch(expected: &TypeName, actual: impl Into<TypeName>) -> Self {
        Self::TypeMismatch {
            expected: expected.clone(),
            actual:   actual.into(),
        }
    }

    /// Create a schema processing error scoped to a type
    pub fn schema_for_type(
        type_name: &TypeName,
        operation: &str,
        details: impl std::fmt::Display,
    ) -> Self {
        Self::SchemaProcessing(format!("{operation} failed for {type_name}: {details}"))
    }

    /// Create a materialization error for the node at `path`
    pub fn materialization(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Materialization {
            path:   path.into(),
            reason: reason.to_string(),
        }
    }
}
