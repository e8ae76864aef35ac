use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::{CapError, ErrorInfo};

fn serde_error(code: &str, err: impl ToString) -> CapError {
    CapError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CapError> {
    let value = serde_json::to_value(value).map_err(|err| serde_error("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical).map_err(|err| serde_error("json_write", err))?;
    Ok(bytes)
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, CapError> {
    serde_json::from_slice(data).map_err(|err| serde_error("json_deserialize", err))
}

/// JSON-safe encoding for `f64` arrays that keeps NaN and infinities intact.
///
/// Finite values are plain JSON numbers; non-finite values become the strings
/// `"NaN"`, `"inf"` and `"-inf"`.
pub mod finite_lossless {
    use serde::de::{self, Deserializer};
    use serde::ser::{SerializeSeq, Serializer};
    use serde::Deserialize;
    use serde_json::Value;

    /// Serializes a slice of floats.
    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&encode(*value))?;
        }
        seq.end()
    }

    /// Deserializes a vector of floats written by [`serialize`].
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let raw = Vec::<Value>::deserialize(deserializer)?;
        raw.iter()
            .map(|value| decode(value).ok_or_else(|| de::Error::custom(format!("not a number: {value}"))))
            .collect()
    }

    /// Encodes one float as a JSON value.
    pub fn encode(value: f64) -> Value {
        if value.is_nan() {
            Value::String("NaN".into())
        } else if value == f64::INFINITY {
            Value::String("inf".into())
        } else if value == f64::NEG_INFINITY {
            Value::String("-inf".into())
        } else {
            serde_json::Number::from_f64(value)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
    }

    /// Decodes one JSON value produced by [`encode`].
    pub fn decode(value: &Value) -> Option<f64> {
        match value {
            Value::Number(number) => number.as_f64(),
            Value::String(text) => match text.as_str() {
                "NaN" | "nan" => Some(f64::NAN),
                "inf" | "Infinity" => Some(f64::INFINITY),
                "-inf" | "-Infinity" => Some(f64::NEG_INFINITY),
                _ => None,
            },
            _ => None,
        }
    }
}
