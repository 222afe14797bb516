//! Given a rule's `when` patterns, the variables its `where` clause
//! promises to bind, and its `then` patterns, can every `then` input
//! be instantiated?  A rule that fails this check would fail on every
//! firing, so we reject it when it is built rather than when it runs.
//!
//! The check is purely static: `where` is an opaque async function,
//! so the variables it binds must be declared up front.  A `where`
//! clause that declares a variable and then fails to bind it is still
//! caught, at evaluation time, by the dispatcher.
use crate::error::RuleError;
use crate::unification::{Pattern, VariableId};
use std::collections::BTreeSet;

/// The binding plan of a rule: which variables are available to its
/// `then` patterns, and where they come from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BindingPlan {
    /// Variables bound by unification with `when` patterns.
    matched: BTreeSet<VariableId>,
    /// Variables `where` declares it binds, minus `matched`.
    derived: BTreeSet<VariableId>,
}

impl BindingPlan {
    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn matched(&self) -> &BTreeSet<VariableId> {
        &self.matched
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn derived(&self) -> &BTreeSet<VariableId> {
        &self.derived
    }

    #[must_use]
    pub fn is_bound(&self, var: &VariableId) -> bool {
        self.matched.contains(var) || self.derived.contains(var)
    }
}

/// Returns the binding plan for rule `name`, after checking that
/// every `then` pattern only refers to bound variables.
///
/// # Errors
///
/// Returns `Err` when `when` is empty, when a `then` pattern has an
/// output template, or when a `then` input refers to a variable that
/// neither `when` nor the `derived` declaration binds.
pub fn plan_rule<'a, I>(
    name: &str,
    when: &[Pattern],
    derived: I,
    then: &[Pattern],
) -> Result<BindingPlan, RuleError>
where
    I: IntoIterator<Item = &'a VariableId>,
{
    if when.is_empty() {
        return Err(RuleError::EmptyWhen { rule: name.into() });
    }

    let mut matched = BTreeSet::new();
    for pattern in when {
        matched = pattern
            .output
            .insert_variables(pattern.input.insert_variables(matched));
    }

    let derived: BTreeSet<VariableId> = derived
        .into_iter()
        .filter(|var| !matched.contains(*var))
        .cloned()
        .collect();
    let plan = BindingPlan { matched, derived };

    for pattern in then {
        if !pattern.output.is_empty() {
            return Err(RuleError::ThenOutputTemplate {
                rule: name.into(),
                pattern: pattern.to_string(),
            });
        }

        if let Some(var) = pattern.input.variables().into_iter().find(|v| !plan.is_bound(v)) {
            return Err(RuleError::UnboundThenVariable {
                rule: name.into(),
                pattern: pattern.to_string(),
                variable: var,
            });
        }
    }

    Ok(plan)
}

#[test]
fn test_plan_happy_path() {
    use crate::template;

    let [a, b] = crate::vars(["a", "b"]);
    let when = [Pattern::new("X", "run").input(template! { "a" => &a, "b" => &b })];
    let then = [Pattern::new("Y", "run").input(template! { "a" => &a })];

    let plan = plan_rule("A", &when, None, &then).expect("ok");
    assert!(plan.is_bound(&a));
    assert!(plan.derived().is_empty());
}

#[test]
fn test_plan_unbound_then_variable() {
    use crate::template;

    let [a, owner] = crate::vars(["a", "owner"]);
    let when = [Pattern::new("X", "run").input(template! { "a" => &a })];
    let then = [Pattern::new("Y", "run").input(template! { "owner" => &owner })];

    match plan_rule("B", &when, None, &then) {
        Err(RuleError::UnboundThenVariable { variable, .. }) => assert_eq!(variable, owner),
        other => panic!("unexpected {:?}", other),
    }

    // Declaring the variable as `where`-bound fixes it.
    let plan = plan_rule("B", &when, [&owner], &then).expect("ok");
    assert_eq!(plan.derived().len(), 1);
}

#[test]
fn test_plan_rejects_empty_when() {
    assert!(matches!(
        plan_rule("C", &[], None, &[]),
        Err(RuleError::EmptyWhen { .. })
    ));
}

#[test]
fn test_plan_rejects_then_output() {
    use crate::template;

    let x = crate::VariableId::new("x");
    let when = [Pattern::new("X", "run").output(template! { "x" => &x })];
    let then = [Pattern::new("Y", "run").output(template! { "x" => &x })];

    assert!(matches!(
        plan_rule("D", &when, None, &then),
        Err(RuleError::ThenOutputTemplate { .. })
    ));
}
