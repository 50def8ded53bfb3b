//! Leaf values: canonical zero values, validation of JSON literals and parsing of user text

use serde_json::{Number, Value};

use crate::codec::TextCodec;
use crate::constants::NULL_PREVIEW;
use crate::error::{Error, Result};
use crate::resolver::TypeDescription;
use crate::type_kind::TypeKind;
use crate::type_name::{PrimitiveKind, TypeName};

/// Pseudo type name describing the shape of a JSON literal, for mismatch errors
pub(crate) fn json_type(value: &Value) -> TypeName {
    let name = match value {
        Value::Null => "json null",
        Value::Bool(_) => "json bool",
        Value::Number(_) => "json number",
        Value::String(_) => "json string",
        Value::Array(_) => "json array",
        Value::Object(_) => "json object",
    };
    TypeName::from(name)
}

/// Value a fresh leaf starts with
pub(crate) fn zero_value(description: &TypeDescription, codec: Option<&dyn TextCodec>) -> Value {
    if description.kind == TypeKind::Enum {
        return Value::String(
            description
                .default_variant
                .clone()
                .or_else(|| description.variants.first().cloned())
                .unwrap_or_default(),
        );
    }
    if let Some(codec) = codec {
        return codec.zero();
    }
    match description.type_name.primitive_kind() {
        Some(PrimitiveKind::Bool) => Value::Bool(false),
        Some(PrimitiveKind::Char) => Value::String('\0'.to_string()),
        Some(PrimitiveKind::Signed { .. } | PrimitiveKind::Unsigned { .. }) => Value::from(0),
        Some(PrimitiveKind::Float) => Value::from(0.0),
        Some(PrimitiveKind::Text) => Value::String(String::new()),
        None => Value::Null,
    }
}

/// Validate a JSON literal for a leaf, returning its canonical stored form
pub(crate) fn normalize(
    description: &TypeDescription,
    codec: Option<&dyn TextCodec>,
    value: &Value,
) -> Result<Value> {
    let type_name = &description.type_name;
    if description.kind == TypeKind::Enum {
        let Some(variant) = value.as_str() else {
            return Err(Error::mismatch(type_name, json_type(value)).into());
        };
        if !description.variants.iter().any(|v| v == variant) {
            return Err(Error::invalid_value(
                type_name,
                format!(
                    "unknown variant '{variant}', expected one of: {}",
                    description.variants.join(", ")
                ),
            )
            .into());
        }
        return Ok(value.clone());
    }
    if let Some(codec) = codec {
        if !value.is_string() {
            return Err(Error::mismatch(type_name, json_type(value)).into());
        }
        return codec.normalize(value);
    }

    let mismatch = || Error::mismatch(type_name, json_type(value));
    match type_name.primitive_kind() {
        Some(PrimitiveKind::Bool) => value
            .is_boolean()
            .then(|| value.clone())
            .ok_or_else(|| mismatch().into()),
        Some(PrimitiveKind::Char) => match value.as_str() {
            Some(text) if text.chars().count() == 1 => Ok(value.clone()),
            Some(text) => Err(Error::invalid_value(
                type_name,
                format!("'{text}' is not a single character"),
            )
            .into()),
            None => Err(mismatch().into()),
        },
        Some(PrimitiveKind::Signed { min, max }) => {
            if !value.is_number() {
                return Err(mismatch().into());
            }
            match value.as_i64() {
                Some(n) if (min..=max).contains(&n) => Ok(Value::from(n)),
                Some(n) => Err(Error::invalid_value(
                    type_name,
                    format!("{n} is outside {min}..={max}"),
                )
                .into()),
                None => Err(
                    Error::invalid_value(type_name, format!("{value} is not an integer")).into(),
                ),
            }
        }
        Some(PrimitiveKind::Unsigned { max }) => {
            if !value.is_number() {
                return Err(mismatch().into());
            }
            match value.as_u64() {
                Some(n) if n <= max => Ok(Value::from(n)),
                Some(n) => Err(
                    Error::invalid_value(type_name, format!("{n} is outside 0..={max}")).into(),
                ),
                None => Err(Error::invalid_value(
                    type_name,
                    format!("{value} is not a non-negative integer"),
                )
                .into()),
            }
        }
        Some(PrimitiveKind::Float) => value
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| mismatch().into()),
        Some(PrimitiveKind::Text) => value
            .is_string()
            .then(|| value.clone())
            .ok_or_else(|| mismatch().into()),
        None => match value {
            Value::Array(_) | Value::Object(_) => Err(mismatch().into()),
            scalar => Ok(scalar.clone()),
        },
    }
}

/// Parse user supplied text for a leaf
pub(crate) fn parse_text(
    description: &TypeDescription,
    codec: Option<&dyn TextCodec>,
    text: &str,
) -> Result<Value> {
    if description.kind == TypeKind::Enum {
        return normalize(description, codec, &Value::String(text.trim().to_string()));
    }
    if let Some(codec) = codec {
        return codec.from_text(text);
    }
    let type_name = &description.type_name;
    let invalid = |e: &dyn std::fmt::Display| Error::invalid_value(type_name, e);
    let parsed = match type_name.primitive_kind() {
        Some(PrimitiveKind::Bool) => {
            Value::Bool(text.trim().parse::<bool>().map_err(|e| invalid(&e))?)
        }
        Some(PrimitiveKind::Signed { .. }) => {
            Value::from(text.trim().parse::<i64>().map_err(|e| invalid(&e))?)
        }
        Some(PrimitiveKind::Unsigned { .. }) => {
            Value::from(text.trim().parse::<u64>().map_err(|e| invalid(&e))?)
        }
        Some(PrimitiveKind::Float) => {
            let number = text.trim().parse::<f64>().map_err(|e| invalid(&e))?;
            Value::Number(Number::from_f64(number).ok_or_else(|| invalid(&"not a finite number"))?)
        }
        Some(PrimitiveKind::Char | PrimitiveKind::Text) | None => Value::String(text.to_string()),
    };
    normalize(description, codec, &parsed)
}

/// Render a stored value for previews and editing
pub(crate) fn to_text(value: &Value, codec: Option<&dyn TextCodec>) -> String {
    if let Some(codec) = codec {
        return codec.to_text(value);
    }
    match value {
        Value::String(text) => text.clone(),
        Value::Null => NULL_PREVIEW.to_string(),
        other => other.to_string(),
    }
}
