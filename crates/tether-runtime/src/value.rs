//! Wire values exchanged with script code.
//!
//! Everything crossing the host/script boundary travels as JSON text. This
//! module holds the kind tags used to describe host parameters and fields, the
//! coercion applied to incoming script values, and the [`Raw`] passthrough.

use crate::error::{TetherError, TetherResult};
use serde::de::{DeserializeOwned, Deserializer};
use serde::ser::{Error as _, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;
use std::any::TypeId;
use std::fmt;

/// Wire text meaning `undefined` on the script side.
pub(crate) const UNDEFINED: &str = "";

/// Declared kind of a host parameter or proxied field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    /// Any integer width
    Int,
    /// Any float width
    Float,
    String,
    /// Untyped, accepts anything
    Any,
    /// Keyed mapping
    Map,
    /// Ordered sequence
    Seq,
    /// Host struct, decoded from a keyed mapping
    Struct,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Any => "any",
            Self::Map => "map",
            Self::Seq => "sequence",
            Self::Struct => "struct",
        }
    }

    /// Kind a proxied field takes from its current value.
    pub(crate) fn of_field(value: &Value) -> ValueKind {
        match value {
            Value::Null => Self::Any,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_f64() => Self::Float,
            Value::Number(_) => Self::Int,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Seq,
            Value::Object(_) => Self::Map,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the JSON type of `value`, for error messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "map",
    }
}

const I64_MIN: f64 = i64::MIN as f64;
// 2^63 and 2^64, the first values past `i64::MAX` and `u64::MAX`.
const I64_END: f64 = 9_223_372_036_854_775_808.0;
const U64_END: f64 = 18_446_744_073_709_551_616.0;

/// Coerce a decoded script value to `kind`.
///
/// Values already of the right shape pass through. Numbers convert to floats,
/// and to ints by truncation as long as the result fits an `i64` or `u64`.
/// Maps are accepted for structs and re-decoded by the caller into the host type.
pub(crate) fn coerce(value: Value, kind: ValueKind) -> TetherResult<Value> {
    match (kind, &value) {
        (ValueKind::Any, _) => Ok(value),
        (ValueKind::Bool, Value::Bool(_))
        | (ValueKind::String, Value::String(_))
        | (ValueKind::Seq, Value::Array(_))
        | (ValueKind::Map | ValueKind::Struct, Value::Object(_))
        | (ValueKind::Float, Value::Number(_)) => Ok(value),
        (ValueKind::Int, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Ok(value)
            } else {
                match n.as_f64().map(f64::trunc) {
                    Some(t) if (I64_MIN..I64_END).contains(&t) => Ok(Value::from(t as i64)),
                    Some(t) if (I64_END..U64_END).contains(&t) => Ok(Value::from(t as u64)),
                    _ => Err(TetherError::type_mismatch(kind.name(), "number")),
                }
            }
        }
        _ => Err(TetherError::type_mismatch(kind.name(), type_name(&value))),
    }
}

/// Coerce then decode a script value into a host type.
pub(crate) fn decode_as<T: DeserializeOwned>(value: Value, kind: ValueKind) -> TetherResult<T> {
    let value = coerce(value, kind)?;
    let actual = type_name(&value);
    serde_json::from_value(value).map_err(|err| {
        TetherError::type_mismatch_with(std::any::type_name::<T>(), actual, err)
    })
}

/// Encode a host return value as wire text. `()` becomes `undefined`.
pub(crate) fn encode_return<R: Serialize + 'static>(value: &R) -> TetherResult<String> {
    if TypeId::of::<R>() == TypeId::of::<()>() {
        return Ok(UNDEFINED.to_string());
    }
    Ok(serde_json::to_string(value)?)
}

/// JSON text passed through without decoding.
///
/// As an `eval` result it receives the engine's JSON text verbatim. As a host
/// function return it is handed to script as-is, so it must be valid JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raw(String);

impl Raw {
    /// Wrap JSON text, checking that it parses.
    pub fn new(json: impl Into<String>) -> TetherResult<Raw> {
        let json = json.into();
        serde_json::from_str::<&RawValue>(&json)?;
        Ok(Raw(json))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode the text into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> TetherResult<T> {
        Ok(serde_json::from_str(&self.0)?)
    }
}

impl fmt::Display for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Raw {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(self.0.clone()).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Raw {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(Raw(raw.get().to_string()))
    }
}
