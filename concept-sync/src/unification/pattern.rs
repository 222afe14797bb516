//! Patterns describe expectations to match against (yielding
//! extended Frames), or, symmetrically, templates to populate from
//! Frames.
//!
//! A template maps field names to slots.  A slot is either a literal,
//! which the matched record must carry verbatim, or a reference to a
//! variable, which must agree with the frame if already bound and is
//! bound otherwise.  Fields the template does not mention are ignored:
//! rules routinely match on a subset of an action's fields.
use super::{Frame, VariableId};
use crate::ground::{ActionInvocation, Outcome, Record, Value, ERROR_FIELD};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    /// The field must equal this value.
    Literal(Value),
    /// References with the same variable must match (be populated
    /// with) the same value.
    Reference(VariableId),
}

impl Slot {
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Slot::Literal(value.into())
    }
}

impl From<VariableId> for Slot {
    fn from(var: VariableId) -> Self {
        Slot::Reference(var)
    }
}

impl From<&VariableId> for Slot {
    fn from(var: &VariableId) -> Self {
        Slot::Reference(var.clone())
    }
}

impl From<Value> for Slot {
    fn from(value: Value) -> Self {
        Slot::Literal(value)
    }
}

impl From<&str> for Slot {
    fn from(s: &str) -> Self {
        Slot::Literal(s.into())
    }
}

impl From<String> for Slot {
    fn from(s: String) -> Self {
        Slot::Literal(s.into())
    }
}

impl From<bool> for Slot {
    fn from(b: bool) -> Self {
        Slot::Literal(b.into())
    }
}

impl From<i64> for Slot {
    fn from(i: i64) -> Self {
        Slot::Literal(i.into())
    }
}

impl From<i32> for Slot {
    fn from(i: i32) -> Self {
        Slot::Literal(i.into())
    }
}

/// Builds a `Template` from `field => slot` pairs.  Variables (or
/// references to variables) become references; anything else becomes
/// a literal.
///
/// ```
/// use concept_sync::{template, vars};
/// let [request] = vars(["request"]);
/// let t = template! { "path" => "/MenuCollection/createMenu", "request" => &request };
/// assert_eq!(t.variables().len(), 1);
/// ```
#[macro_export]
macro_rules! template {
    () => { $crate::unification::Template::new() };
    ($($field:expr => $slot:expr),+ $(,)?) => {{
        let mut template = $crate::unification::Template::new();
        $( template.insert($field, $crate::unification::Slot::from($slot)); )+
        template
    }};
}

static ABSENT: Value = Value::Absent;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Template {
    slots: BTreeMap<String, Slot>,
}

impl Template {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, slot: Slot) {
        self.slots.insert(field.into(), slot);
    }

    #[must_use]
    pub fn with(mut self, field: &str, slot: impl Into<Slot>) -> Self {
        self.insert(field, slot.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Slot> {
        self.slots.get(field)
    }

    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.slots.contains_key(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Slot)> {
        self.slots.iter()
    }

    /// Returns the set of variables referenced in the template.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<VariableId> {
        self.insert_variables(BTreeSet::new())
    }

    /// Inserts all variables in the template into `dst`.
    #[must_use]
    pub fn insert_variables(&self, mut dst: BTreeSet<VariableId>) -> BTreeSet<VariableId> {
        for slot in self.slots.values() {
            if let Slot::Reference(var) = slot {
                dst.insert(var.clone());
            }
        }

        dst
    }

    /// Matches `record` against the template, extending `frame`.
    ///
    /// Fields named by the template but missing from `record` match
    /// as `Value::Absent`: literals never equal it (unless the literal
    /// is `Absent` itself), and fresh variables are bound to it.
    #[must_use]
    pub fn unify(&self, mut frame: Frame, record: &Record) -> Option<Frame> {
        for (field, slot) in &self.slots {
            let actual = record.get(field).unwrap_or(&ABSENT);
            frame = match slot {
                Slot::Literal(expected) if expected == actual => frame,
                Slot::Literal(_) => return None,
                Slot::Reference(var) => frame.bind(var, actual.clone())?,
            };
        }

        Some(frame)
    }

    /// Instantiates the template with the values in `frame`.
    ///
    /// Fields whose variable is bound to `Value::Absent` are left out
    /// of the record: a field that was missing where the variable was
    /// captured stays missing where it is used.
    ///
    /// # Errors
    ///
    /// Returns the first referenced variable that `frame` does not
    /// bind.
    pub fn resolve(&self, frame: &Frame) -> Result<Record, VariableId> {
        let mut record = Record::new();

        for (field, slot) in &self.slots {
            let value = match slot {
                Slot::Literal(value) => value.clone(),
                Slot::Reference(var) => frame.get(var).ok_or_else(|| var.clone())?.clone(),
            };
            if value.is_absent() {
                continue;
            }
            record.insert(field.clone(), value);
        }

        Ok(record)
    }
}

impl<K: Into<String>> FromIterator<(K, Slot)> for Template {
    fn from_iter<I: IntoIterator<Item = (K, Slot)>>(iter: I) -> Self {
        Self {
            slots: iter.into_iter().map(|(k, slot)| (k.into(), slot)).collect(),
        }
    }
}

/// A pattern is a partial specification of one action or query call:
/// which concept member, and templates for its input and output.
#[derive(Clone, Debug, PartialEq)]
pub struct Pattern {
    pub concept: String,
    pub member: String,
    pub input: Template,
    pub output: Template,
}

impl Pattern {
    #[must_use]
    pub fn new(concept: &str, member: &str) -> Self {
        Self {
            concept: concept.into(),
            member: member.into(),
            input: Template::new(),
            output: Template::new(),
        }
    }

    #[must_use]
    pub fn input(mut self, input: Template) -> Self {
        self.input = input;
        self
    }

    #[must_use]
    pub fn output(mut self, output: Template) -> Self {
        self.output = output;
        self
    }

    #[inline]
    #[must_use]
    pub fn targets(&self, invocation: &ActionInvocation) -> bool {
        invocation.is(&self.concept, &self.member)
    }

    /// Returns all variables in the input and output templates.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<VariableId> {
        self.output
            .insert_variables(self.input.insert_variables(BTreeSet::new()))
    }

    /// Attempts to extend `frame` so that `invocation` fits the
    /// pattern.
    ///
    /// The output template also selects between success and failure:
    /// a template that names the `error` field only matches failed
    /// invocations, a non-empty template without it only matches
    /// successful ones, and an empty template matches both.
    #[must_use]
    pub fn unify(&self, frame: Frame, invocation: &ActionInvocation) -> Option<Frame> {
        if !self.targets(invocation) {
            return None;
        }

        let wants_error = self.output.contains(ERROR_FIELD);
        match (&invocation.output, wants_error) {
            (Outcome::Done(_), true) => return None,
            (Outcome::Failed(_), false) if !self.output.is_empty() => return None,
            _ => {}
        }

        let frame = self.input.unify(frame, &invocation.input)?;
        self.output.unify(frame, &invocation.output.as_record())
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.concept, self.member)
    }
}

/// `unify(frame, pattern, invocation)`: the free-standing form of
/// [`Pattern::unify`].
#[must_use]
pub fn unify(frame: Frame, pattern: &Pattern, invocation: &ActionInvocation) -> Option<Frame> {
    pattern.unify(frame, invocation)
}

#[cfg(test)]
fn invocation(input: Record, output: crate::ground::ActionOutcome) -> ActionInvocation {
    ActionInvocation::new("ActionX", "run", input, output)
}

#[test]
fn test_pattern_match_happy_path() {
    use crate::record;

    let [a, b] = super::vars(["a", "b"]);
    let pattern = Pattern::new("ActionX", "run")
        .input(template! { "a" => &a })
        .output(template! { "b" => &b });

    let frame = pattern
        .unify(
            Frame::new(),
            &invocation(record! { "a" => 1, "z" => 9 }, Outcome::Done(record! { "b" => 2 })),
        )
        .expect("matches");

    assert_eq!(frame.get(&a), Some(&Value::Int(1)));
    assert_eq!(frame.get(&b), Some(&Value::Int(2)));
    // Unmentioned fields are ignored.
    assert_eq!(frame.len(), 2);
}

#[test]
fn test_pattern_literal_mismatch() {
    use crate::record;

    let pattern = Pattern::new("ActionX", "run").input(template! { "path" => "/a" });
    let inv = invocation(record! { "path" => "/b" }, Outcome::Done(record! {}));

    assert_eq!(pattern.unify(Frame::new(), &inv), None);
}

#[test]
fn test_pattern_wrong_member() {
    use crate::record;

    let pattern = Pattern::new("ActionX", "stop");
    let inv = invocation(record! {}, Outcome::Done(record! {}));

    assert_eq!(pattern.unify(Frame::new(), &inv), None);
}

#[test]
fn test_pattern_repeated_variable_mismatch() {
    use crate::record;

    let x = VariableId::new("x");
    let pattern = Pattern::new("ActionX", "run")
        .input(template! { "a" => &x })
        .output(template! { "b" => &x });

    let same = invocation(record! { "a" => 1 }, Outcome::Done(record! { "b" => 1 }));
    let different = invocation(record! { "a" => 1 }, Outcome::Done(record! { "b" => 2 }));

    assert!(pattern.unify(Frame::new(), &same).is_some());
    assert_eq!(pattern.unify(Frame::new(), &different), None);
}

#[test]
fn test_pattern_conflicts_with_frame() {
    use crate::record;

    let a = VariableId::new("a");
    let pattern = Pattern::new("ActionX", "run").input(template! { "a" => &a });
    let inv = invocation(record! { "a" => 1 }, Outcome::Done(record! {}));

    let bound = Frame::new().with(&a, 2);
    assert_eq!(pattern.unify(bound, &inv), None);

    let agreeing = Frame::new().with(&a, 1);
    assert!(pattern.unify(agreeing, &inv).is_some());
}

#[test]
fn test_pattern_missing_field_binds_absent() {
    use crate::record;

    let session = VariableId::new("session");
    let pattern = Pattern::new("ActionX", "run").input(template! { "session" => &session });
    let inv = invocation(record! {}, Outcome::Done(record! {}));

    let frame = pattern.unify(Frame::new(), &inv).expect("matches");
    assert_eq!(frame.get(&session), Some(&Value::Absent));

    // A literal never matches a missing field.
    let literal = Pattern::new("ActionX", "run").input(template! { "session" => "s" });
    assert_eq!(literal.unify(Frame::new(), &inv), None);
}

#[test]
fn test_pattern_selects_error_outputs() {
    use crate::record;

    let [menu, error] = super::vars(["menu", "error"]);
    let on_success = Pattern::new("ActionX", "run").output(template! { "menu" => &menu });
    let on_error = Pattern::new("ActionX", "run").output(template! { "error" => &error });
    let on_either = Pattern::new("ActionX", "run");

    let ok = invocation(record! {}, Outcome::Done(record! { "menu" => "m1" }));
    let failed = invocation(record! {}, Outcome::failed("no such date"));

    assert!(on_success.unify(Frame::new(), &ok).is_some());
    assert_eq!(on_success.unify(Frame::new(), &failed), None);

    assert_eq!(on_error.unify(Frame::new(), &ok), None);
    let frame = on_error.unify(Frame::new(), &failed).expect("matches");
    assert_eq!(frame.get(&error), Some(&Value::from("no such date")));

    assert!(on_either.unify(Frame::new(), &ok).is_some());
    assert!(on_either.unify(Frame::new(), &failed).is_some());
}

#[test]
fn test_template_resolve() {
    let [menu, date] = super::vars(["menu", "date"]);
    let template = template! { "menu" => &menu, "menuDate" => &date, "kind" => "weekly" };

    let frame = Frame::new().with(&menu, "m1");
    assert_eq!(template.resolve(&frame), Err(date.clone()));

    let frame = frame.with(&date, "2024-01-01");
    let record = template.resolve(&frame).expect("bound");
    assert_eq!(record["menu"], Value::from("m1"));
    assert_eq!(record["menuDate"], Value::from("2024-01-01"));
    assert_eq!(record["kind"], Value::from("weekly"));

    let frame = Frame::new().with(&menu, "m1").with(&date, Value::Absent);
    let record = template.resolve(&frame).expect("bound");
    assert_eq!(record.len(), 2);
    assert!(!record.contains_key("menuDate"));
}

#[cfg(test)]
proptest::proptest! {
    #[test]
    fn prop_unification_sound(a in 0i64..4, b in 0i64..4, prior in proptest::option::of(0i64..4)) {
        use crate::record;
        use proptest::prelude::*;

        // Both fields go to the same variable: a frame exists iff they
        // agree with each other and with any prior binding.
        let x = VariableId::new("x");
        let pattern = Pattern::new("ActionX", "run")
            .input(template! { "a" => &x })
            .output(template! { "b" => &x });
        let frame = match prior {
            Some(p) => Frame::new().with(&x, p),
            None => Frame::new(),
        };
        let inv = invocation(record! { "a" => a }, Outcome::Done(record! { "b" => b }));

        let expected = a == b && prior.map_or(true, |p| p == a);
        let result = pattern.unify(frame, &inv);
        prop_assert_eq!(result.is_some(), expected);
        if let Some(frame) = result {
            prop_assert_eq!(frame.len(), 1);
            prop_assert_eq!(frame.get(&x), Some(&Value::Int(a)));
        }
    }
}
