//! Values are what pattern variables are bound to.  Concepts trade in
//! strings (identifiers, names), numbers, booleans, dates, and small
//! structured records; a `Value` is the closed sum of those shapes.
//!
//! `Value::Absent` is not a domain value.  It is the sentinel a
//! pattern variable is bound to when the record being matched does not
//! carry the field at all, so that frames stay total on the variables
//! they mention.  No concept should ever return it.
//!
//! Equality is what unification uses to decide whether two bindings
//! agree, so numbers compare by numeric value: `Int(2)` equals
//! `Float(2.0)`, and a NaN equals any other NaN.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// The field was missing from the matched record.
    Absent,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(DateTime<Utc>),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
}

impl Value {
    #[inline]
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Returns true for anything but `Absent` and `Null`.
    #[inline]
    #[must_use]
    pub fn is_present(&self) -> bool {
        !matches!(self, Value::Absent | Value::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Returns true iff `self` is a string with at least one
    /// character.  Session tokens and identifiers are only meaningful
    /// when non-empty.
    #[must_use]
    pub fn is_non_empty_str(&self) -> bool {
        self.as_str().map_or(false, |s| !s.is_empty())
    }
}

/// Compares `i` with `x` exactly: `x` must be integral and convert
/// back to the same `i64`.
fn int_eq_float(i: i64, x: f64) -> bool {
    x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 && x as i64 == i
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Absent, Value::Absent) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Int(i), Value::Float(x)) | (Value::Float(x), Value::Int(i)) => {
                int_eq_float(*i, *x)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Absent => write!(f, "<absent>"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Date(d) => write!(f, "{}", d.to_rfc3339()),
            other => match serde_json::to_string(other) {
                Ok(json) => f.write_str(&json),
                Err(_) => Err(fmt::Error),
            },
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(record: BTreeMap<String, Value>) -> Self {
        Value::Record(record)
    }
}

/// JSON request bodies come in untyped.  Strings that parse as RFC 3339
/// timestamps stay strings: only concepts know which fields are dates.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            // Integral floats such as `2.0` become `Int`.
            Json::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Value::Int(i),
                (None, Some(x)) if int_eq_float(x as i64, x) => Value::Int(x as i64),
                (None, x) => Value::Float(x.unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s),
            Json::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Json::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[test]
fn test_absent_is_not_null() {
    assert_ne!(Value::Absent, Value::Null);
    assert!(Value::Absent.is_absent());
    assert!(!Value::Null.is_absent());
    assert!(!Value::Absent.is_present());
    assert!(!Value::Null.is_present());
    assert!(Value::from("x").is_present());
}

#[test]
fn test_accessors() {
    assert_eq!(Value::from("menu").as_str(), Some("menu"));
    assert_eq!(Value::from(3).as_i64(), Some(3));
    assert_eq!(Value::from(3).as_f64(), Some(3.0));
    assert_eq!(Value::from(true).as_bool(), Some(true));
    assert_eq!(Value::from(true).as_str(), None);
    assert!(Value::from("s").is_non_empty_str());
    assert!(!Value::from("").is_non_empty_str());
    assert!(!Value::from(1).is_non_empty_str());
}

#[test]
fn test_from_json() {
    let json = serde_json::json!({"name": "Soup", "servings": 4, "tags": ["a"], "vegan": false});
    let value = Value::from(json);
    let record = value.as_record().expect("record");

    assert_eq!(record["name"], Value::from("Soup"));
    assert_eq!(record["servings"], Value::Int(4));
    assert_eq!(record["tags"], Value::List(vec![Value::from("a")]));
    assert_eq!(record["vegan"], Value::Bool(false));
}

#[test]
fn test_display() {
    assert_eq!(Value::from("a").to_string(), "\"a\"");
    assert_eq!(Value::Int(7).to_string(), "7");
    assert_eq!(Value::Absent.to_string(), "<absent>");
    assert_eq!(Value::List(vec![Value::Int(1)]).to_string(), "[1]");
}

#[test]
fn test_numeric_equality() {
    assert_eq!(Value::Int(2), Value::Float(2.0));
    assert_eq!(Value::Float(2.0), Value::Int(2));
    assert_ne!(Value::Int(2), Value::Float(2.5));
    assert_ne!(Value::Int(i64::MAX), Value::Float(i64::MAX as f64));
    assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    assert_ne!(Value::Float(f64::NAN), Value::Int(0));
    assert_ne!(Value::Int(1), Value::Bool(true));
    assert_ne!(Value::Null, Value::Absent);

    assert_eq!(
        Value::List(vec![Value::Int(1), Value::Float(2.0)]),
        Value::List(vec![Value::Float(1.0), Value::Int(2)])
    );

    let json = Value::from(serde_json::json!({"q": 2.0, "r": 2.5}));
    let record = json.as_record().expect("record");
    assert!(matches!(record["q"], Value::Int(2)));
    assert!(matches!(record["r"], Value::Float(x) if x == 2.5));
}
