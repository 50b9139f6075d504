//! Field-level event filters.
//!
//! A filter is a conjunction of clauses. A clause names one or more payload
//! fields and an expected value; it holds when any named field equals the
//! value. Equality is structural, except that a JSON number also matches its
//! decimal string form (`7` matches `"7"`), since chain payloads encode ids
//! either way.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Clause {
    fields: Vec<String>,
    expected: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    clauses: Vec<Clause>,
}

impl FieldFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    #[must_use]
    pub fn field(self, field: &str, value: impl Into<Value>) -> Self {
        self.any_of(&[field], value)
    }

    /// Require at least one of `fields` to equal `value`.
    #[must_use]
    pub fn any_of(mut self, fields: &[&str], value: impl Into<Value>) -> Self {
        self.clauses.push(Clause {
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            expected: value.into(),
        });
        self
    }

    /// An empty filter matches everything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    #[must_use]
    pub fn matches(&self, data: &Map<String, Value>) -> bool {
        self.clauses.iter().all(|clause| {
            clause
                .fields
                .iter()
                .filter_map(|f| data.get(f))
                .any(|actual| values_match(actual, &clause.expected))
        })
    }
}

fn values_match(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => false,
    }
}
