//! The attribute value model shared by every engine.
//!
//! Documents are ordered mappings from field name to [`AttributeValue`], a closed
//! tagged union of primitives, millisecond-precision date-time instants, arrays
//! and nested mappings. Engines only ever see this universe; anything outside of
//! it (BSON binaries, object ids, ...) is rejected at the conversion boundary.

use bson::{Bson, DateTime};
use indexmap::IndexMap;
use serde_json::Value;

use crate::error::{EngineError, EngineResult};

/// Field name -> value mapping of a single document.
pub type Attributes = IndexMap<String, AttributeValue>;

/// Document id -> attributes mapping, in the order an engine produced them.
pub type Documents = IndexMap<String, Attributes>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Signed integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Date-time instant with millisecond precision
    DateTime(DateTime),
    /// Array of values
    Array(Vec<AttributeValue>),
    /// Nested mapping
    Map(Attributes),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(value) => Some(*value as f64),
            AttributeValue::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_date_time(&self) -> Option<DateTime> {
        match self {
            AttributeValue::DateTime(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AttributeValue]> {
        match self {
            AttributeValue::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            AttributeValue::Map(attributes) => Some(attributes),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Boolean(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Integer(value.into())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Integer(value.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<DateTime> for AttributeValue {
    fn from(value: DateTime) -> Self {
        AttributeValue::DateTime(value)
    }
}

/// Sub-millisecond precision is truncated.
impl<Tz: chrono::TimeZone> From<chrono::DateTime<Tz>> for AttributeValue {
    fn from(value: chrono::DateTime<Tz>) -> Self {
        AttributeValue::DateTime(DateTime::from_chrono(value))
    }
}

impl From<Attributes> for AttributeValue {
    fn from(value: Attributes) -> Self {
        AttributeValue::Map(value)
    }
}

impl<T: Into<AttributeValue>> From<Vec<T>> for AttributeValue {
    fn from(values: Vec<T>) -> Self {
        AttributeValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(AttributeValue::Null)
    }
}

/// Plain JSON conversion. Numbers that fit an `i64` become integers, everything
/// else numeric becomes a float. No tagged wrappers are interpreted here.
impl From<Value> for AttributeValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => AttributeValue::Null,
            Value::Bool(value) => AttributeValue::Boolean(value),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => AttributeValue::Integer(integer),
                None => number
                    .as_f64()
                    .map(AttributeValue::Float)
                    .unwrap_or(AttributeValue::Null),
            },
            Value::String(value) => AttributeValue::String(value),
            Value::Array(values) => AttributeValue::Array(
                values
                    .into_iter()
                    .map(AttributeValue::from)
                    .collect()
            ),
            Value::Object(map) => AttributeValue::Map(
                map
                    .into_iter()
                    .map(|(key, value)| (key, AttributeValue::from(value)))
                    .collect()
            ),
        }
    }
}

impl TryFrom<Bson> for AttributeValue {
    type Error = EngineError;

    fn try_from(bson: Bson) -> EngineResult<Self> {
        Ok(match bson {
            Bson::Null => AttributeValue::Null,
            Bson::Boolean(value) => AttributeValue::Boolean(value),
            Bson::Int32(value) => AttributeValue::Integer(value.into()),
            Bson::Int64(value) => AttributeValue::Integer(value),
            Bson::Double(value) => AttributeValue::Float(value),
            Bson::String(value) => AttributeValue::String(value),
            Bson::DateTime(value) => AttributeValue::DateTime(value),
            Bson::Array(values) => AttributeValue::Array(
                values
                    .into_iter()
                    .map(AttributeValue::try_from)
                    .collect::<EngineResult<Vec<_>>>()?
            ),
            Bson::Document(document) => AttributeValue::Map(
                document
                    .into_iter()
                    .map(|(key, value)| Ok((key, AttributeValue::try_from(value)?)))
                    .collect::<EngineResult<Attributes>>()?
            ),
            other => {
                return Err(EngineError::InvalidValue(format!(
                    "BSON {:?} values cannot be stored as attributes",
                    other.element_type()
                )));
            }
        })
    }
}

impl From<AttributeValue> for Bson {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Null => Bson::Null,
            AttributeValue::Boolean(value) => Bson::Boolean(value),
            AttributeValue::Integer(value) => Bson::Int64(value),
            AttributeValue::Float(value) => Bson::Double(value),
            AttributeValue::String(value) => Bson::String(value),
            AttributeValue::DateTime(value) => Bson::DateTime(value),
            AttributeValue::Array(values) => Bson::Array(
                values
                    .into_iter()
                    .map(Bson::from)
                    .collect()
            ),
            AttributeValue::Map(attributes) => Bson::Document(
                bson::Document::from_iter(
                    attributes
                        .into_iter()
                        .map(|(key, value)| (key, Bson::from(value)))
                )
            ),
        }
    }
}

/// Builds an [`Attributes`] mapping.
///
/// ```ignore
/// let user = attributes! { "name" => "Alice", "tags" => vec!["admin"] };
/// ```
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::attribute::Attributes::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut attributes = $crate::attribute::Attributes::new();
        $(
            attributes.insert(
                ::std::string::String::from($key),
                $crate::attribute::AttributeValue::from($value),
            );
        )+
        attributes
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_numbers_keep_integers() {
        let value = AttributeValue::from(json!({ "count": 3, "ratio": 0.5 }));
        let map = value.as_map().unwrap();

        assert_eq!(map["count"], AttributeValue::Integer(3));
        assert_eq!(map["ratio"], AttributeValue::Float(0.5));
    }

    #[test]
    fn test_bson_conversion_preserves_structure() {
        let when = DateTime::from_millis(1_700_000_000_123);
        let attributes = attributes! {
            "name" => "Alice",
            "when" => when,
            "tags" => vec!["a", "b"],
            "address" => attributes! { "city" => "Lisbon" },
        };

        let bson = Bson::from(AttributeValue::Map(attributes.clone()));
        let restored = AttributeValue::try_from(bson).unwrap();

        assert_eq!(restored, AttributeValue::Map(attributes));
    }

    #[test]
    fn test_bson_outside_universe_is_rejected() {
        let error = AttributeValue::try_from(Bson::ObjectId(bson::oid::ObjectId::new())).unwrap_err();

        assert!(matches!(error, EngineError::InvalidValue(_)));
    }

    #[test]
    fn test_attribute_order_does_not_affect_equality() {
        let left = attributes! { "a" => 1, "b" => 2 };
        let right = attributes! { "b" => 2, "a" => 1 };

        assert_eq!(left, right);
    }
}
