//! A newtype wrapper for type names used throughout the builder
//!
//! This module provides the `TypeName` type which represents fully-qualified
//! type names (e.g., "demo::conversation::Conversation") with utility methods
//! for classifying the built-in value types.

use serde::{Deserialize, Serialize};

use crate::constants::{
    TYPE_ALLOC_STRING, TYPE_ANY, TYPE_BOOL, TYPE_CHAR, TYPE_DATE_TIME, TYPE_F32, TYPE_F64, TYPE_I8,
    TYPE_I16, TYPE_I32, TYPE_I64, TYPE_STD_STRING, TYPE_STRING, TYPE_U8, TYPE_U16, TYPE_U32,
    TYPE_U64, TYPE_UUID,
};

/// A newtype wrapper for type names used as `HashMap` keys
///
/// Type names are opaque to the builder apart from the built-in value types
/// classified here; everything else is looked up through a
/// [`TypeResolver`](crate::TypeResolver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TypeName(String);

/// Classification of the built-in value types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// `bool`
    Bool,
    /// `char`, stored as a one character string
    Char,
    /// Signed integer with inclusive bounds
    Signed {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// Unsigned integer with inclusive upper bound
    Unsigned {
        /// Largest accepted value
        max: u64,
    },
    /// `f32` or `f64`
    Float,
    /// Any of the string spellings
    Text,
}

impl TypeName {
    /// The top type, assignable from every type
    pub fn any() -> Self {
        Self(TYPE_ANY.to_string())
    }

    /// Get the underlying string reference
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the base type name by stripping generic parameters
    /// For example: `Vec<String>` returns `Vec`
    pub fn base_type(&self) -> &str {
        self.0.split('<').next().unwrap_or(&self.0)
    }

    /// Get the short name (last segment after ::) of the base type
    /// For example: `demo::conversation::Conversation` returns `Conversation`
    pub fn short_name(&self) -> String {
        let base = self.base_type();
        base.rsplit("::").next().unwrap_or(base).to_string()
    }

    /// Whether this is the top type
    pub fn is_any(&self) -> bool {
        self.0 == TYPE_ANY
    }

    /// Primitive classification, `None` for everything that is not a built-in value type
    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        let kind = match self.0.as_str() {
            TYPE_BOOL => PrimitiveKind::Bool,
            TYPE_CHAR => PrimitiveKind::Char,
            TYPE_I8 => PrimitiveKind::Signed {
                min: i8::MIN.into(),
                max: i8::MAX.into(),
            },
            TYPE_I16 => PrimitiveKind::Signed {
                min: i16::MIN.into(),
                max: i16::MAX.into(),
            },
            TYPE_I32 => PrimitiveKind::Signed {
                min: i32::MIN.into(),
                max: i32::MAX.into(),
            },
            TYPE_I64 => PrimitiveKind::Signed {
                min: i64::MIN,
                max: i64::MAX,
            },
            TYPE_U8 => PrimitiveKind::Unsigned {
                max: u8::MAX.into(),
            },
            TYPE_U16 => PrimitiveKind::Unsigned {
                max: u16::MAX.into(),
            },
            TYPE_U32 => PrimitiveKind::Unsigned {
                max: u32::MAX.into(),
            },
            TYPE_U64 => PrimitiveKind::Unsigned { max: u64::MAX },
            TYPE_F32 | TYPE_F64 => PrimitiveKind::Float,
            TYPE_STRING | TYPE_STD_STRING | TYPE_ALLOC_STRING => PrimitiveKind::Text,
            _ => return None,
        };
        Some(kind)
    }

    /// Primitive types always carry a value: numbers, `bool` and `char`.
    /// Strings are value types but not primitive, they may be left unset.
    pub fn is_primitive(&self) -> bool {
        self.primitive_kind()
            .is_some_and(|kind| kind != PrimitiveKind::Text)
    }

    /// Whether this names one of the string spellings
    pub fn is_string(&self) -> bool {
        self.primitive_kind() == Some(PrimitiveKind::Text)
    }

    /// Whether a codec ships with the builder for this type
    pub fn has_builtin_codec(&self) -> bool {
        matches!(self.0.as_str(), TYPE_UUID | TYPE_DATE_TIME)
    }
}

impl From<&str> for TypeName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TypeName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&String> for TypeName {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl From<&Self> for TypeName {
    fn from(type_name: &Self) -> Self {
        type_name.clone()
    }
}

impl From<TypeName> for String {
    fn from(type_name: TypeName) -> Self {
        type_name.0
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TypeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_strips_module_and_generics() {
        assert_eq!(
            TypeName::from("demo::conversation::Conversation").short_name(),
            "Conversation"
        );
        assert_eq!(
            TypeName::from("std::collections::HashMap<String, i32>").short_name(),
            "HashMap"
        );
        assert_eq!(TypeName::from("i32").short_name(), "i32");
    }

    #[test]
    fn test_string_is_not_primitive() {
        assert!(TypeName::from("i32").is_primitive());
        assert!(TypeName::from("char").is_primitive());
        assert!(!TypeName::from("String").is_primitive());
        assert!(TypeName::from("alloc::string::String").is_string());
        assert!(!TypeName::from("demo::Conversation").is_primitive());
    }

    #[test]
    fn test_unsigned_bounds() {
        assert_eq!(
            TypeName::from("u8").primitive_kind(),
            Some(PrimitiveKind::Unsigned { max: 255 })
        );
    }
}
