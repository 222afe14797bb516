//! Sync rules are the engine's program.  A rule reads
//!
//! ```text
//! when   A(...) => (...), B(...) => (...)     -- completed actions
//! where  refine(frames)                       -- filters, queries, derived bindings
//! then   C(...), D(...)                       -- actions to dispatch, once per frame
//! ```
//!
//! and is built once, at startup, with `SyncRule::builder`.  Building
//! checks the rule's binding plan (see `matching::plan_rule`), so a
//! rule whose `then` refers to a variable nothing binds never makes it
//! into a registry.
//!
//! `where` is arbitrary async code over `Frames`; the only constraint
//! is that every variable it introduces and `then` uses must be
//! declared with `binds`.  Refinement steps compose in the order they
//! were added.
use crate::error::RuleError;
use crate::execution::Concepts;
use crate::matching::{plan_rule, BindingPlan, Frames};
use crate::unification::{Frame, Pattern, VariableId};
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

/// A boxed `where` step.
pub type Refine =
    Arc<dyn Fn(Frames, Arc<Concepts>) -> BoxFuture<'static, anyhow::Result<Frames>> + Send + Sync>;

pub struct SyncRule {
    name: String,
    when: Vec<Pattern>,
    refine: Vec<Refine>,
    then: Vec<Pattern>,
    plan: BindingPlan,
}

impl SyncRule {
    #[must_use]
    pub fn builder(name: &str) -> SyncBuilder {
        SyncBuilder {
            name: name.into(),
            when: Vec::new(),
            refine: Vec::new(),
            binds: BTreeSet::new(),
            then: Vec::new(),
        }
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn when(&self) -> &[Pattern] {
        &self.when
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn then(&self) -> &[Pattern] {
        &self.then
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn plan(&self) -> &BindingPlan {
        &self.plan
    }

    /// Runs the `where` steps over `frames`.  A rule without `where`
    /// returns its frames unchanged.
    ///
    /// # Errors
    ///
    /// Returns the first fault raised by a step.
    pub async fn refine(
        &self,
        mut frames: Frames,
        concepts: &Arc<Concepts>,
    ) -> anyhow::Result<Frames> {
        for step in &self.refine {
            if frames.is_empty() {
                break;
            }

            frames = step(frames, Arc::clone(concepts)).await?;
        }

        Ok(frames)
    }

    /// Every concept the rule matches on or dispatches to.
    pub fn concepts(&self) -> impl Iterator<Item = &str> {
        self.when
            .iter()
            .chain(self.then.iter())
            .map(|pattern| pattern.concept.as_str())
    }
}

impl std::fmt::Debug for SyncRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRule")
            .field("name", &self.name)
            .field("when", &self.when)
            .field("refine_steps", &self.refine.len())
            .field("then", &self.then)
            .finish()
    }
}

pub struct SyncBuilder {
    name: String,
    when: Vec<Pattern>,
    refine: Vec<Refine>,
    binds: BTreeSet<VariableId>,
    then: Vec<Pattern>,
}

impl SyncBuilder {
    #[must_use]
    pub fn when(mut self, pattern: Pattern) -> Self {
        self.when.push(pattern);
        self
    }

    /// Appends an async `where` step.
    #[must_use]
    pub fn refine<F, Fut>(mut self, step: F) -> Self
    where
        F: Fn(Frames, Arc<Concepts>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Frames>> + Send + 'static,
    {
        self.refine
            .push(Arc::new(move |frames, concepts| step(frames, concepts).boxed()));
        self
    }

    /// Appends a synchronous `where` step that keeps the frames
    /// satisfying `predicate`.
    #[must_use]
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: Fn(&Frame) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        self.refine(move |frames, _| {
            let predicate = Arc::clone(&predicate);
            async move { Ok::<_, anyhow::Error>(frames.filter(|frame| predicate(frame))) }
        })
    }

    /// Declares variables that the `where` steps bind.
    #[must_use]
    pub fn binds<'a, I: IntoIterator<Item = &'a VariableId>>(mut self, vars: I) -> Self {
        self.binds.extend(vars.into_iter().cloned());
        self
    }

    #[must_use]
    pub fn then(mut self, pattern: Pattern) -> Self {
        self.then.push(pattern);
        self
    }

    /// Checks the binding plan and returns the rule.
    ///
    /// # Errors
    ///
    /// See [`plan_rule`].
    pub fn build(self) -> Result<SyncRule, RuleError> {
        let plan = plan_rule(&self.name, &self.when, &self.binds, &self.then)?;

        Ok(SyncRule {
            name: self.name,
            when: self.when,
            refine: self.refine,
            then: self.then,
            plan,
        })
    }
}

/// The load-once set of rules a dispatcher evaluates.  Rules are kept
/// in registration order, which is also evaluation order; rules must
/// not depend on it.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    rules: Vec<SyncRule>,
    names: HashSet<String>,
}

impl SyncRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns `Err` if a rule with the same name is already present.
    pub fn register(&mut self, rule: SyncRule) -> Result<(), RuleError> {
        if !self.names.insert(rule.name.clone()) {
            return Err(RuleError::DuplicateRule(rule.name));
        }

        self.rules.push(rule);
        Ok(())
    }

    /// Builds a registry from rule-building results, as produced by
    /// a module of rule definitions.
    ///
    /// # Errors
    ///
    /// Returns the first build or registration error.
    pub fn from_rules<I>(rules: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = Result<SyncRule, RuleError>>,
    {
        let mut registry = Self::new();
        for rule in rules {
            registry.register(rule?)?;
        }

        Ok(registry)
    }

    /// Checks that every concept any rule mentions is registered.
    ///
    /// # Errors
    ///
    /// Returns `Err` for the first rule naming an unknown concept.
    pub fn check_concepts(&self, concepts: &Concepts) -> Result<(), RuleError> {
        for rule in &self.rules {
            if let Some(missing) = rule.concepts().find(|name| !concepts.contains(name)) {
                return Err(RuleError::UnknownConcept {
                    rule: rule.name.clone(),
                    concept: missing.into(),
                });
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, SyncRule> {
        self.rules.iter()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SyncRule> {
        self.rules.iter().find(|rule| rule.name == name)
    }
}

#[test]
fn test_builder_checks_plan() {
    use crate::template;

    let [a, owner] = crate::vars(["a", "owner"]);
    let unbound = SyncRule::builder("Unbound")
        .when(Pattern::new("X", "run").input(template! { "a" => &a }))
        .then(Pattern::new("Y", "run").input(template! { "owner" => &owner }))
        .build();
    assert!(matches!(unbound, Err(RuleError::UnboundThenVariable { .. })));

    let declared = SyncRule::builder("Declared")
        .when(Pattern::new("X", "run").input(template! { "a" => &a }))
        .binds([&owner])
        .then(Pattern::new("Y", "run").input(template! { "owner" => &owner }))
        .build()
        .expect("ok");
    assert!(declared.plan().is_bound(&owner));
    assert_eq!(declared.concepts().collect::<Vec<_>>(), vec!["X", "Y"]);
}

#[test]
fn test_registry_rejects_duplicates() {
    let rule = |name: &str| SyncRule::builder(name).when(Pattern::new("X", "run")).build();

    let registry = SyncRegistry::from_rules(vec![rule("A"), rule("B")]).expect("ok");
    assert_eq!(registry.len(), 2);
    assert!(registry.get("B").is_some());

    assert!(matches!(
        SyncRegistry::from_rules(vec![rule("A"), rule("A")]),
        Err(RuleError::DuplicateRule(_))
    ));
}

#[test]
fn test_registry_checks_concepts() {
    use crate::execution::FnConcept;

    let registry = SyncRegistry::from_rules(vec![SyncRule::builder("A")
        .when(Pattern::new("X", "run"))
        .then(Pattern::new("Y", "run"))
        .build()])
    .expect("ok");

    let mut concepts = Concepts::new();
    concepts.register(FnConcept::new("X")).expect("ok");
    assert!(matches!(
        registry.check_concepts(&concepts),
        Err(RuleError::UnknownConcept { .. })
    ));

    concepts.register(FnConcept::new("Y")).expect("ok");
    assert!(registry.check_concepts(&concepts).is_ok());
}

#[tokio::test]
async fn test_refine_steps_compose() {
    use crate::ground::Value;

    let [n, doubled] = crate::vars(["n", "doubled"]);
    let rule = {
        let n = n.clone();
        let doubled = doubled.clone();
        let keep = n.clone();
        SyncRule::builder("Compose")
            .when(Pattern::new("X", "run"))
            .filter(move |frame| frame.get(&keep).and_then(Value::as_i64).map_or(false, |v| v > 1))
            .binds([&doubled])
            .refine(move |frames, _| {
                let n = n.clone();
                let doubled = doubled.clone();
                async move {
                    Ok::<_, anyhow::Error>(frames.bind(&doubled, |frame| {
                        frame.get(&n).and_then(Value::as_i64).map(|v| Value::Int(v * 2))
                    }))
                }
            })
            .build()
            .expect("ok")
    };

    let frames: Frames = (1..=3).map(|i| Frame::new().with(&n, i)).collect();
    let refined = rule
        .refine(frames, &Arc::new(Concepts::new()))
        .await
        .expect("ok");

    let values: Vec<_> = refined.iter().filter_map(|f| f.get(&doubled).cloned()).collect();
    assert_eq!(values, vec![Value::Int(4), Value::Int(6)]);
}
