//! Post-read document filters.
//!
//! A [`Filters`] value narrows the result of `read_many`. It is a conjunction of:
//!
//! - an optional id restriction (`$in`),
//! - field predicates, each either a literal equality or a `$contains`
//!   constraint that matches when the field is an array sharing at least one
//!   value with the candidates.
//!
//! Filters are evaluated in memory after documents are read; no engine pushes
//! them down to its substrate.
//!
//! ```ignore
//! use docengine::filter::Filters;
//!
//! let filters = Filters::new()
//!     .eq("status", "active")
//!     .contains("tags", vec!["admin", "owner"]);
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    attribute::{AttributeValue, Attributes},
    error::{EngineError, EngineResult},
};

/// Wire key restricting results to a list of document ids.
pub const IN_OPERATOR: &str = "$in";

/// Wire key of the array intersection constraint.
pub const CONTAINS_OPERATOR: &str = "$contains";

/// A predicate on a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    /// Field equals the value.
    Equals(AttributeValue),
    /// Field is an array containing any of the values.
    Contains(Vec<AttributeValue>),
}

/// A conjunction of predicates applied to `read_many` results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters {
    ids: Option<Vec<String>>,
    fields: IndexMap<String, FieldFilter>,
}

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches documents whose `field` equals `value`.
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.fields
            .insert(field.into(), FieldFilter::Equals(value.into()));
        self
    }

    /// Matches documents whose `field` is an array sharing a value with `values`.
    pub fn contains<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<AttributeValue>,
    {
        self.fields.insert(
            field.into(),
            FieldFilter::Contains(values.into_iter().map(Into::into).collect()),
        );
        self
    }

    /// Restricts results to the given document ids.
    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn id_restriction(&self) -> Option<&[String]> {
        self.ids.as_deref()
    }

    pub fn field_filters(&self) -> impl Iterator<Item = (&str, &FieldFilter)> {
        self.fields
            .iter()
            .map(|(field, filter)| (field.as_str(), filter))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.fields.is_empty()
    }

    /// Evaluates every predicate against one document.
    pub fn matches(&self, id: &str, attributes: &Attributes) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|candidate| candidate == id) {
                return false;
            }
        }

        self.fields
            .iter()
            .all(|(field, filter)| match attributes.get(field) {
                Some(value) => filter.matches(value),
                None => false,
            })
    }
}

impl FieldFilter {
    pub fn matches(&self, value: &AttributeValue) -> bool {
        match self {
            FieldFilter::Equals(expected) => Comparable::from(value) == Comparable::from(expected),
            FieldFilter::Contains(candidates) => match Comparable::from(value) {
                Comparable::Array(items) => candidates
                    .iter()
                    .map(Comparable::from)
                    .any(|candidate| items.iter().any(|item| item == &candidate)),
                _ => false,
            },
        }
    }
}

/// Parses the wire representation:
/// `{"$in": ["id", ...], "field": <literal>, "field": {"$contains": [...]}}`.
impl TryFrom<Value> for Filters {
    type Error = EngineError;

    fn try_from(value: Value) -> EngineResult<Self> {
        let Value::Object(map) = value else {
            return Err(EngineError::InvalidFilter("filters must be an object".into()));
        };

        let mut filters = Filters::new();

        for (key, value) in map {
            if key == IN_OPERATOR {
                filters.ids = Some(parse_ids(value)?);
            } else if key.starts_with('$') {
                return Err(EngineError::InvalidFilter(format!("unknown operator {key}")));
            } else {
                let filter = parse_field_filter(&key, value)?;
                filters.fields.insert(key, filter);
            }
        }

        Ok(filters)
    }
}

fn parse_ids(value: Value) -> EngineResult<Vec<String>> {
    let Value::Array(ids) = value else {
        return Err(EngineError::InvalidFilter(format!("{IN_OPERATOR} expects an array of ids")));
    };

    ids.into_iter()
        .map(|id| match id {
            Value::String(id) => Ok(id),
            other => Err(EngineError::InvalidFilter(format!(
                "{IN_OPERATOR} expects string ids, got {other}"
            ))),
        })
        .collect()
}

fn parse_field_filter(field: &str, value: Value) -> EngineResult<FieldFilter> {
    match value {
        Value::Object(map) if map.keys().any(|key| key.starts_with('$')) => {
            let mut entries = map.into_iter();

            match (entries.next(), entries.next()) {
                (Some((operator, Value::Array(values))), None) if operator == CONTAINS_OPERATOR => Ok(
                    FieldFilter::Contains(values.into_iter().map(AttributeValue::from).collect())
                ),
                (Some((operator, _)), None) if operator == CONTAINS_OPERATOR => Err(EngineError::InvalidFilter(
                    format!("{CONTAINS_OPERATOR} on {field} expects an array"),
                )),
                _ => Err(EngineError::InvalidFilter(format!(
                    "unsupported operator object on {field}"
                ))),
            }
        },
        literal => Ok(FieldFilter::Equals(AttributeValue::from(literal))),
    }
}

/// Borrowed view of attribute values with numeric normalization, so that an
/// integer and a float holding the same number compare equal.
#[derive(Debug)]
enum Comparable<'a> {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    DateTime(i64),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a AttributeValue> for Comparable<'a> {
    fn from(value: &'a AttributeValue) -> Self {
        match value {
            AttributeValue::Null => Comparable::Null,
            AttributeValue::Boolean(value) => Comparable::Bool(*value),
            AttributeValue::Integer(value) => Comparable::Integer(*value),
            AttributeValue::Float(value) => Comparable::Float(*value),
            AttributeValue::DateTime(value) => Comparable::DateTime(value.timestamp_millis()),
            AttributeValue::String(value) => Comparable::String(value),
            AttributeValue::Array(values) => Comparable::Array(
                values
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            AttributeValue::Map(attributes) => Comparable::Map(
                attributes
                    .iter()
                    .map(|(key, value)| (key.as_str(), Comparable::from(value)))
                    .collect::<HashMap<_, _>>()
            ),
        }
    }
}

/// Whether `float` holds exactly the value of `integer`, with no rounding either way.
fn integer_equals_float(integer: i64, float: f64) -> bool {
    // 2^63, the first float past i64::MAX.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    float.fract() == 0.0 && (-LIMIT..LIMIT).contains(&float) && float as i64 == integer
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Integer(a), Comparable::Integer(b)) => a == b,
            (Comparable::Float(a), Comparable::Float(b)) => a == b,
            (Comparable::Integer(a), Comparable::Float(b))
            | (Comparable::Float(b), Comparable::Integer(a)) => integer_equals_float(*a, *b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes;
    use serde_json::json;

    #[test]
    fn test_literal_filter_compares_by_value() {
        let filters = Filters::new().eq("age", 30.0);

        assert!(filters.matches("1", &attributes! { "age" => 30 }));
        assert!(!filters.matches("1", &attributes! { "age" => 31 }));
        assert!(!filters.matches("1", &attributes! { "name" => "Alice" }));
    }

    #[test]
    fn test_large_integers_compare_exactly() {
        let above_float_precision = Filters::new().eq("n", 9_007_199_254_740_993_i64);

        assert!(above_float_precision.matches("1", &attributes! { "n" => 9_007_199_254_740_993_i64 }));
        assert!(!above_float_precision.matches("1", &attributes! { "n" => 9_007_199_254_740_992_i64 }));
        assert!(!above_float_precision.matches("1", &attributes! { "n" => 9_007_199_254_740_992.0 }));

        let float = Filters::new().eq("n", 9_007_199_254_740_992.0);
        assert!(float.matches("1", &attributes! { "n" => 9_007_199_254_740_992_i64 }));
        assert!(!float.matches("1", &attributes! { "n" => 9_007_199_254_740_993_i64 }));

        let past_i64 = Filters::new().eq("n", 9_223_372_036_854_775_808.0);
        assert!(!past_i64.matches("1", &attributes! { "n" => i64::MAX }));
        assert!(!Filters::new().eq("n", 30.5).matches("1", &attributes! { "n" => 30 }));
    }

    #[test]
    fn test_literal_filter_on_nested_map() {
        let filters = Filters::new().eq("address", attributes! { "city" => "Lisbon", "zip" => "1000" });

        assert!(filters.matches("1", &attributes! {
            "address" => attributes! { "zip" => "1000", "city" => "Lisbon" },
        }));
    }

    #[test]
    fn test_contains_requires_array_intersection() {
        let filters = Filters::new().contains("tags", vec!["a", "z"]);

        assert!(filters.matches("1", &attributes! { "tags" => vec!["a", "b"] }));
        assert!(!filters.matches("1", &attributes! { "tags" => vec!["b", "c"] }));
        assert!(!filters.matches("1", &attributes! { "tags" => "a" }));
        assert!(!Filters::new().contains("tags", Vec::<String>::new())
            .matches("1", &attributes! { "tags" => vec!["a"] }));
    }

    #[test]
    fn test_predicates_are_conjunctive() {
        let filters = Filters::new()
            .ids(["1", "2"])
            .eq("name", "Alice");

        assert!(filters.matches("1", &attributes! { "name" => "Alice" }));
        assert!(!filters.matches("3", &attributes! { "name" => "Alice" }));
        assert!(!filters.matches("2", &attributes! { "name" => "Bob" }));
    }

    #[test]
    fn test_parse_wire_representation() {
        let filters = Filters::try_from(json!({
            "$in": ["1", "2"],
            "name": "Alice",
            "tags": { "$contains": ["a"] },
        }))
        .unwrap();

        assert_eq!(
            filters,
            Filters::new()
                .ids(["1", "2"])
                .eq("name", "Alice")
                .contains("tags", vec!["a"])
        );
    }

    #[test]
    fn test_parse_rejects_malformed_filters() {
        for invalid in [
            json!(["name"]),
            json!({ "$in": "1" }),
            json!({ "$in": [1] }),
            json!({ "$or": [] }),
            json!({ "tags": { "$contains": "a" } }),
            json!({ "tags": { "$contains": ["a"], "$other": [] } }),
        ] {
            assert!(matches!(
                Filters::try_from(invalid),
                Err(EngineError::InvalidFilter(_))
            ));
        }
    }
}
