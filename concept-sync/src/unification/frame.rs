//! A frame is one partial derivation: the values bound so far to a
//! rule's variables, plus the trace invocations that were matched to
//! get there.
//!
//! Frames only ever grow by consistent extension.  Binding a variable
//! that is already bound succeeds iff the values are equal, so no frame
//! can hold two values for the same variable.
use super::VariableId;
use crate::ground::{InvocationId, Value};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frame {
    bindings: BTreeMap<VariableId, Value>,
    /// Trace entries matched by `when` patterns.  Query joins do not
    /// add to this set.
    provenance: BTreeSet<InvocationId>,
}

impl Frame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn get(&self, var: &VariableId) -> Option<&Value> {
        self.bindings.get(var)
    }

    #[inline]
    #[must_use]
    pub fn is_bound(&self, var: &VariableId) -> bool {
        self.bindings.contains_key(var)
    }

    /// Extends `self` with `var = value`.  Returns `None` if `var` is
    /// already bound to a different value.
    #[must_use]
    pub fn bind(mut self, var: &VariableId, value: Value) -> Option<Self> {
        match self.bindings.get(var) {
            Some(prev) if *prev != value => None,
            Some(_) => Some(self),
            None => {
                self.bindings.insert(var.clone(), value);
                Some(self)
            }
        }
    }

    /// Builder-style `bind` for constructing frames by hand.
    ///
    /// # Panics
    ///
    /// Panics on conflicting bindings.
    #[must_use]
    pub fn with(self, var: &VariableId, value: impl Into<Value>) -> Self {
        self.bind(var, value.into())
            .expect("conflicting binding in Frame::with")
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VariableId, &Value)> {
        self.bindings.iter()
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn provenance(&self) -> &BTreeSet<InvocationId> {
        &self.provenance
    }

    /// Records that `id` was matched to build this frame.
    #[must_use]
    pub fn matched(mut self, id: InvocationId) -> Self {
        self.provenance.insert(id);
        self
    }
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (var, value)) in self.bindings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", var, value)?;
        }
        write!(f, "}}")
    }
}

#[test]
fn test_bind_consistent() {
    let x = VariableId::new("x");
    let frame = Frame::new().bind(&x, Value::Int(1)).expect("fresh");

    assert_eq!(frame.get(&x), Some(&Value::Int(1)));
    // Rebinding to the same value is a no-op.
    let again = frame.clone().bind(&x, Value::Int(1)).expect("same");
    assert_eq!(again, frame);
    // Rebinding to another value fails.
    assert!(frame.bind(&x, Value::Int(2)).is_none());
}

#[test]
fn test_absent_conflicts_with_value() {
    let x = VariableId::new("x");
    let frame = Frame::new().with(&x, Value::Absent);

    assert!(frame.clone().bind(&x, Value::Null).is_none());
    assert!(frame.bind(&x, Value::Absent).is_some());
}

#[test]
fn test_display() {
    let x = VariableId::new("x");
    let frame = Frame::new().with(&x, "a");
    assert_eq!(frame.to_string(), format!("{{{}: \"a\"}}", x));
}
