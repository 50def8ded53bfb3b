//! Text codecs for leaf types that are edited as text but are not primitives
//!
//! A codec owns the canonical stored form of its values (always a JSON string), the
//! zero value a fresh leaf starts with, and parsing from user supplied text.

use std::fmt::Debug;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{TYPE_DATE_TIME, TYPE_UUID};
use crate::error::{Error, Result};
use crate::type_name::TypeName;

/// Conversion between the text a user edits and the stored leaf value
pub trait TextCodec: Send + Sync + Debug {
    /// Type this codec handles
    fn type_name(&self) -> TypeName;

    /// Value a fresh leaf of this type starts with
    fn zero(&self) -> Value;

    /// Parse user text into the canonical stored value
    fn from_text(&self, text: &str) -> Result<Value>;

    /// Render a stored value as editable text
    fn to_text(&self, value: &Value) -> String {
        value
            .as_str()
            .map_or_else(|| value.to_string(), ToString::to_string)
    }

    /// Check that an arbitrary JSON literal is a valid value, returning its canonical form
    fn normalize(&self, value: &Value) -> Result<Value> {
        value.as_str().map_or_else(
            || {
                Err(Error::invalid_value(
                    &self.type_name(),
                    format!("expected a string, got {value}"),
                )
                .into())
            },
            |text| self.from_text(text),
        )
    }
}

/// `uuid::Uuid`, stored in hyphenated lower case form
#[derive(Debug, Default)]
pub struct UuidCodec;

impl TextCodec for UuidCodec {
    fn type_name(&self) -> TypeName {
        TypeName::from(TYPE_UUID)
    }

    fn zero(&self) -> Value {
        Value::String(Uuid::nil().hyphenated().to_string())
    }

    fn from_text(&self, text: &str) -> Result<Value> {
        Uuid::parse_str(text.trim())
            .map(|uuid| Value::String(uuid.hyphenated().to_string()))
            .map_err(|e| Error::invalid_value(&self.type_name(), e).into())
    }
}

/// `chrono::DateTime<Utc>`, stored as RFC 3339 text
#[derive(Debug, Default)]
pub struct DateTimeCodec;

impl TextCodec for DateTimeCodec {
    fn type_name(&self) -> TypeName {
        TypeName::from(TYPE_DATE_TIME)
    }

    fn zero(&self) -> Value {
        Value::String(DateTime::<Utc>::UNIX_EPOCH.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    fn from_text(&self, text: &str) -> Result<Value> {
        DateTime::parse_from_rfc3339(text.trim())
            .map(|date| {
                Value::String(
                    date.with_timezone(&Utc)
                        .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                )
            })
            .map_err(|e| Error::invalid_value(&self.type_name(), e).into())
    }
}

/// Codec shipped with the builder for `type_name`, if any
pub fn builtin_codec(type_name: &TypeName) -> Option<Arc<dyn TextCodec>> {
    match type_name.as_str() {
        TYPE_UUID => Some(Arc::new(UuidCodec)),
        TYPE_DATE_TIME => Some(Arc::new(DateTimeCodec)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    #[test]
    fn test_uuid_zero_is_nil() {
        assert_eq!(
            UuidCodec.zero(),
            json!("00000000-0000-0000-0000-000000000000")
        );
    }

    #[test]
    fn test_uuid_from_text_normalizes_case() {
        let value = UuidCodec
            .from_text("67E55044-10B1-426F-9247-BB680E5FE0C8")
            .unwrap();
        assert_eq!(value, json!("67e55044-10b1-426f-9247-bb680e5fe0c8"));
    }

    #[test]
    fn test_uuid_rejects_garbage() {
        let err = UuidCodec.from_text("not a uuid").unwrap_err();
        assert!(matches!(err.current_context(), Error::InvalidValue { .. }));
    }

    #[test]
    fn test_date_time_zero_is_epoch() {
        assert_eq!(DateTimeCodec.zero(), json!("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn test_date_time_converts_offset_to_utc() {
        let value = DateTimeCodec
            .from_text("2020-05-01T12:00:00+02:00")
            .unwrap();
        assert_eq!(value, json!("2020-05-01T10:00:00Z"));
    }

    #[test]
    fn test_normalize_requires_string() {
        assert!(UuidCodec.normalize(&json!(12)).is_err());
    }
}
