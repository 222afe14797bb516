//! Records are the plain, named-field payloads that cross the concept
//! boundary: action inputs and outputs, query inputs and rows.
//!
//! Actions and queries may fail in expected ways ("menu not found").
//! Such failures are data, not exceptions, and an `Outcome` carries
//! either the success payload or the error message.  Rules match on
//! the error message through the reserved `error` field.
use super::Value;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::collections::BTreeMap;

/// A record maps field names to values.  We use an ordered map so that
/// traces and logs are reproducible.
pub type Record = BTreeMap<String, Value>;

/// The field name under which a failed outcome exposes its message to
/// patterns.
pub const ERROR_FIELD: &str = "error";

/// Builds a `Record` from `field => value` pairs; values go through
/// `Value::from`.
///
/// ```
/// use concept_sync::record;
/// let input = record! { "menu" => "m1", "servings" => 4 };
/// assert_eq!(input.len(), 2);
/// ```
#[macro_export]
macro_rules! record {
    () => { $crate::ground::Record::new() };
    ($($field:expr => $value:expr),+ $(,)?) => {{
        let mut record = $crate::ground::Record::new();
        $(
            record.insert(
                ::std::string::String::from($field),
                $crate::ground::Value::from($value),
            );
        )+
        record
    }};
}

/// The result of an action or query call that did not fault.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Failed(String),
}

/// Actions return a single record.
pub type ActionOutcome = Outcome<Record>;

/// Queries return zero or more rows.
pub type QueryOutcome = Outcome<Vec<Record>>;

impl<T> Outcome<T> {
    #[must_use]
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Outcome::Failed(message.into())
    }

    #[inline]
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Failed(message) => Some(message),
        }
    }

    #[must_use]
    pub fn done(&self) -> Option<&T> {
        match self {
            Outcome::Done(value) => Some(value),
            Outcome::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, String> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::Failed(message) => Err(message),
        }
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Done(value),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

impl ActionOutcome {
    /// Returns the record patterns see for this outcome: the output
    /// itself on success, or `{error: message}` on failure.
    #[must_use]
    pub fn as_record(&self) -> Record {
        match self {
            Outcome::Done(record) => record.clone(),
            Outcome::Failed(message) => {
                let mut record = Record::new();
                record.insert(ERROR_FIELD.into(), Value::Str(message.clone()));
                record
            }
        }
    }
}

/// Traces serialise outcomes the way concepts would have returned them
/// over the wire: the payload, or `{"error": message}`.
impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Done(value) => value.serialize(serializer),
            Outcome::Failed(message) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(ERROR_FIELD, message)?;
                map.end()
            }
        }
    }
}

#[test]
fn test_record_macro() {
    let empty: Record = record! {};
    assert!(empty.is_empty());

    let r = record! { "a" => 1, "b" => "two" };
    assert_eq!(r["a"], Value::Int(1));
    assert_eq!(r["b"], Value::from("two"));
}

#[test]
fn test_failed_outcome_as_record() {
    let failed: ActionOutcome = Outcome::failed("menu not found");
    assert!(failed.is_failed());
    assert_eq!(failed.error(), Some("menu not found"));
    assert_eq!(
        failed.as_record(),
        record! { ERROR_FIELD => "menu not found" }
    );

    let done: ActionOutcome = Outcome::Done(record! { "menu" => "m1" });
    assert_eq!(done.as_record(), record! { "menu" => "m1" });
    assert_eq!(done.error(), None);
}

#[test]
fn test_outcome_serialization() {
    let failed: ActionOutcome = Outcome::failed("nope");
    assert_eq!(
        serde_json::to_value(&failed).expect("ok"),
        serde_json::json!({"error": "nope"})
    );

    let rows: QueryOutcome = Outcome::Done(vec![record! { "c" => 10 }]);
    assert_eq!(
        serde_json::to_value(&rows).expect("ok"),
        serde_json::json!([{"c": 10}])
    );
}

#[test]
fn test_from_result() {
    let ok: Outcome<i32> = Result::<i32, String>::Ok(3).into();
    assert_eq!(ok, Outcome::Done(3));

    let err: Outcome<i32> = Result::<i32, &str>::Err("bad").into();
    assert_eq!(err.into_result(), Err("bad".to_string()));
}
