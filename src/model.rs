//! Core data model: URIs, typed values, nested records and tuples.

use std::fmt;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

/// Context assigned to tuples whose source format has no context notion.
pub const DEFAULT_CONTEXT: &str = "urn:strata:nil";

/// A URI-like identifier. Equality is byte-identical; normalization is the
/// caller's responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uri(String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Uri(uri.into())
    }

    pub fn default_context() -> Self {
        Uri(DEFAULT_CONTEXT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Uri(s.to_string())
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Uri(s)
    }
}

/// A tuple value: a typed scalar or a nested record tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bool(bool),
    BigInt(BigInt),
    BigDecimal(BigDecimal),
    Short(i16),
    Uri(Uri),
    Record(Record),
}

impl Value {
    /// Numeric coercion used by the aggregation operators. Non-numeric
    /// kinds (string, bool, URI, record) yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Long(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Short(v) => Some(*v as f64),
            Value::BigInt(v) => v.to_f64(),
            Value::BigDecimal(v) => v.to_f64(),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int(_)
                | Value::Long(_)
                | Value::Float(_)
                | Value::Double(_)
                | Value::Short(_)
                | Value::BigInt(_)
                | Value::BigDecimal(_)
        )
    }
}

/// An ordered, append-only list of (property, value) pairs. Duplicate
/// properties are allowed; order is preserved on round-trip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    entries: Vec<(Uri, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn append(&mut self, property: Uri, value: Value) {
        self.entries.push((property, value));
    }

    pub fn entries(&self) -> &[(Uri, Value)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value for the given property, if any.
    pub fn get(&self, property: &Uri) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, v)| v)
    }
}

impl FromIterator<(Uri, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (Uri, Value)>>(iter: I) -> Self {
        Record {
            entries: iter.into_iter().collect(),
        }
    }
}

/// The atomic unit written to and read from the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    pub item: Uri,
    pub property: Uri,
    pub context: Uri,
    /// Seconds-resolution wall time, non-negative.
    pub time: i64,
    /// Tie-breaker within the same `time` for the same key.
    pub seq_nr: i32,
    pub value: Value,
}

impl Tuple {
    pub fn new(item: Uri, property: Uri, context: Uri, time: i64, seq_nr: i32, value: Value) -> Self {
        Tuple {
            item,
            property,
            context,
            time,
            seq_nr,
            value,
        }
    }
}
