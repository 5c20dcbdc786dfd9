//! JSON encoding of collection blobs.
//!
//! JSON has no date-time type, so date-time attributes are written as a tagged
//! wrapper object `{"__dateTime": <epoch millis>}` and turned back into
//! instants when a blob is read. Both directions walk nested arrays and maps
//! recursively.

use bson::DateTime;
use serde_json::{Map, Number, Value};

use docengine_core::{
    attribute::{AttributeValue, Attributes, Documents},
    error::{EngineError, EngineResult},
};


/// Key of the wrapper object holding a serialized date-time.
pub const DATE_TIME_TAG: &str = "__dateTime";

/// Serializes and deserializes attribute values to and from blob JSON.
pub(crate) struct AttributeCodec;

impl AttributeCodec {
    /// Encodes a whole collection as JSON text.
    pub(crate) fn encode_collection(documents: &Documents) -> EngineResult<String> {
        let blob = documents
            .iter()
            .map(|(id, attributes)| Ok((id.clone(), Self::serialize_attributes(attributes)?)))
            .collect::<EngineResult<Map<String, Value>>>()?;

        Ok(serde_json::to_string(&Value::Object(blob))?)
    }

    /// Decodes JSON text written by [`AttributeCodec::encode_collection`].
    pub(crate) fn decode_collection(blob: &str) -> EngineResult<Documents> {
        match serde_json::from_str::<Value>(blob)? {
            Value::Object(documents) => documents
                .into_iter()
                .map(|(id, attributes)| Ok((id, Self::deserialize_attributes(attributes)?)))
                .collect(),
            _ => Err(EngineError::Serialization(
                "collection blob is not a JSON object".into(),
            )),
        }
    }

    pub(crate) fn serialize_attributes(attributes: &Attributes) -> EngineResult<Value> {
        Ok(Value::Object(
            attributes
                .iter()
                .map(|(name, value)| Ok((name.clone(), Self::serialize_value(value)?)))
                .collect::<EngineResult<Map<String, Value>>>()?,
        ))
    }

    /// Recursively converts a value to JSON, wrapping date-times.
    ///
    /// Non-finite floats have no JSON representation and are rejected.
    pub(crate) fn serialize_value(value: &AttributeValue) -> EngineResult<Value> {
        Ok(match value {
            AttributeValue::Null => Value::Null,
            AttributeValue::Boolean(value) => Value::Bool(*value),
            AttributeValue::Integer(value) => Value::Number((*value).into()),
            AttributeValue::Float(value) => Value::Number(
                Number::from_f64(*value)
                    .ok_or_else(|| EngineError::InvalidValue(format!("{value} cannot be stored as JSON")))?,
            ),
            AttributeValue::String(value) => Value::String(value.clone()),
            AttributeValue::DateTime(value) => {
                let mut wrapper = Map::new();
                wrapper.insert(DATE_TIME_TAG.to_string(), Value::Number(value.timestamp_millis().into()));
                Value::Object(wrapper)
            },
            AttributeValue::Array(values) => Value::Array(
                values
                    .iter()
                    .map(Self::serialize_value)
                    .collect::<EngineResult<Vec<_>>>()?,
            ),
            AttributeValue::Map(attributes) => Self::serialize_attributes(attributes)?,
        })
    }

    pub(crate) fn deserialize_attributes(value: Value) -> EngineResult<Attributes> {
        match Self::deserialize_value(value) {
            AttributeValue::Map(attributes) => Ok(attributes),
            _ => Err(EngineError::Serialization(
                "stored document is not a JSON object".into(),
            )),
        }
    }

    /// Recursively converts blob JSON back to a value, unwrapping date-times.
    pub(crate) fn deserialize_value(value: Value) -> AttributeValue {
        match value {
            Value::Array(values) => AttributeValue::Array(
                values
                    .into_iter()
                    .map(Self::deserialize_value)
                    .collect(),
            ),
            Value::Object(map) => match Self::date_time_millis(&map) {
                Some(millis) => AttributeValue::DateTime(DateTime::from_millis(millis)),
                None => AttributeValue::Map(
                    map.into_iter()
                        .map(|(name, value)| (name, Self::deserialize_value(value)))
                        .collect(),
                ),
            },
            scalar => AttributeValue::from(scalar),
        }
    }

    /// Returns the epoch millis of a date-time wrapper, if `map` is one.
    fn date_time_millis(map: &Map<String, Value>) -> Option<i64> {
        if map.len() != 1 {
            return None;
        }

        map.get(DATE_TIME_TAG).and_then(Value::as_i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docengine_core::attributes;
    use serde_json::json;

    #[test]
    fn test_date_times_are_tagged_recursively() {
        let when = DateTime::from_millis(1_600_000_000_000);
        let attributes = attributes! {
            "created" => when,
            "history" => vec![AttributeValue::from(when)],
            "meta" => attributes! { "seen" => when },
        };

        let serialized = AttributeCodec::serialize_attributes(&attributes).unwrap();

        assert_eq!(
            serialized,
            json!({
                "created": { "__dateTime": 1_600_000_000_000_i64 },
                "history": [{ "__dateTime": 1_600_000_000_000_i64 }],
                "meta": { "seen": { "__dateTime": 1_600_000_000_000_i64 } },
            })
        );
        assert_eq!(AttributeCodec::deserialize_attributes(serialized).unwrap(), attributes);
    }

    #[test]
    fn test_maps_with_other_keys_are_not_date_times() {
        let value = AttributeCodec::deserialize_value(json!({ "__dateTime": 1, "other": 2 }));

        assert!(value.as_map().is_some());
        assert!(AttributeCodec::deserialize_value(json!({ "__dateTime": "soon" })).as_map().is_some());
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        let error = AttributeCodec::serialize_value(&AttributeValue::Float(f64::NAN)).unwrap_err();

        assert!(matches!(error, EngineError::InvalidValue(_)));
    }

    #[test]
    fn test_decode_rejects_non_object_blobs() {
        assert!(matches!(
            AttributeCodec::decode_collection("[1, 2]"),
            Err(EngineError::Serialization(_))
        ));
        assert!(matches!(
            AttributeCodec::decode_collection(r#"{"id": 3}"#),
            Err(EngineError::Serialization(_))
        ));
    }
}
