//! Concepts are the engine's external collaborators.  Each one owns
//! its storage and exposes named actions (mutations) and queries
//! (reads); the engine knows nothing else about them.
//!
//! Both kinds of call are async and take a plain record.  Expected
//! failures come back as `Outcome::Failed`; `Err` is reserved for
//! faults (bugs, lost connections) and is never matched by rules.
use crate::error::{EngineError, RuleError};
use crate::ground::{ActionOutcome, QueryOutcome, Record};
use crate::matching::Query;
use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[async_trait]
pub trait Concept: Send + Sync {
    /// The concept name patterns refer to, e.g. `MenuCollection`.
    fn name(&self) -> &str;

    /// Performs `action`.  Unknown actions are faults.
    async fn perform(&self, action: &str, input: Record) -> anyhow::Result<ActionOutcome>;

    /// Runs `query`, which must not mutate state.  Unknown queries are
    /// faults.
    async fn query(&self, query: &str, input: Record) -> anyhow::Result<QueryOutcome>;
}

/// The set of concepts a dispatcher can reach, by name.  Built once at
/// startup and shared immutably between cascades.
#[derive(Clone, Default)]
pub struct Concepts {
    by_name: HashMap<String, Arc<dyn Concept>>,
}

impl Concepts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `concept` under its name.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a concept with the same name is already
    /// registered.
    pub fn register<C: Concept + 'static>(&mut self, concept: C) -> Result<(), RuleError> {
        self.register_arc(Arc::new(concept))
    }

    /// Like `register`, for concepts the caller also keeps a handle on.
    ///
    /// # Errors
    ///
    /// Returns `Err` on duplicate names.
    pub fn register_arc(&mut self, concept: Arc<dyn Concept>) -> Result<(), RuleError> {
        let name = concept.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(RuleError::DuplicateConcept(name));
        }

        self.by_name.insert(name, concept);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Concept>> {
        self.by_name.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Returns a handle on `concept.query`, suitable for
    /// [`Frames::query`](crate::matching::Frames::query).
    ///
    /// # Errors
    ///
    /// Returns `Err` if `concept` is not registered.
    pub fn query(&self, concept: &str, query: &str) -> Result<QueryHandle, EngineError> {
        let target = self
            .get(concept)
            .ok_or_else(|| EngineError::UnknownConcept(concept.into()))?;

        Ok(QueryHandle {
            concept: Arc::clone(target),
            query: query.into(),
        })
    }

    /// Performs `concept.action` on `input`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `concept` is not registered, or if the action
    /// faults.
    pub async fn perform(
        &self,
        concept: &str,
        action: &str,
        input: Record,
    ) -> Result<ActionOutcome, EngineError> {
        let target = self
            .get(concept)
            .ok_or_else(|| EngineError::UnknownConcept(concept.into()))?;

        target
            .perform(action, input)
            .await
            .map_err(|source| EngineError::ActionFault {
                concept: concept.into(),
                action: action.into(),
                source,
            })
    }
}

impl std::fmt::Debug for Concepts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort();
        f.debug_struct("Concepts").field("names", &names).finish()
    }
}

/// One query of one concept, callable as a [`Query`].
#[derive(Clone)]
pub struct QueryHandle {
    concept: Arc<dyn Concept>,
    query: String,
}

#[async_trait]
impl Query for QueryHandle {
    async fn call(&self, input: Record) -> anyhow::Result<QueryOutcome> {
        self.concept.query(&self.query, input).await
    }
}

type ActionFn =
    Arc<dyn Fn(Record) -> BoxFuture<'static, anyhow::Result<ActionOutcome>> + Send + Sync>;
type QueryFn =
    Arc<dyn Fn(Record) -> BoxFuture<'static, anyhow::Result<QueryOutcome>> + Send + Sync>;

/// A concept assembled from async closures, one per action or query.
/// State, if any, lives in whatever the closures capture.
#[derive(Clone)]
pub struct FnConcept {
    name: String,
    actions: HashMap<String, ActionFn>,
    queries: HashMap<String, QueryFn>,
}

impl FnConcept {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            actions: HashMap::new(),
            queries: HashMap::new(),
        }
    }

    #[must_use]
    pub fn action<F, Fut>(mut self, name: &str, fun: F) -> Self
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ActionOutcome>> + Send + 'static,
    {
        self.actions
            .insert(name.into(), Arc::new(move |input| fun(input).boxed()));
        self
    }

    #[must_use]
    pub fn query<F, Fut>(mut self, name: &str, fun: F) -> Self
    where
        F: Fn(Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<QueryOutcome>> + Send + 'static,
    {
        self.queries
            .insert(name.into(), Arc::new(move |input| fun(input).boxed()));
        self
    }
}

#[async_trait]
impl Concept for FnConcept {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self, action: &str, input: Record) -> anyhow::Result<ActionOutcome> {
        let fun = self
            .actions
            .get(action)
            .ok_or_else(|| anyhow::anyhow!("{} has no action `{}`", self.name, action))?;
        fun(input).await
    }

    async fn query(&self, query: &str, input: Record) -> anyhow::Result<QueryOutcome> {
        let fun = self
            .queries
            .get(query)
            .ok_or_else(|| anyhow::anyhow!("{} has no query `{}`", self.name, query))?;
        fun(input).await
    }
}

#[tokio::test]
async fn test_fn_concept_dispatch() {
    use crate::ground::Outcome;
    use crate::record;

    let mut concepts = Concepts::new();
    concepts
        .register(
            FnConcept::new("Counter")
                .action("bump", |input: Record| async move {
                    Ok::<_, anyhow::Error>(Outcome::Done(record! { "seen" => input.len() as i64 }))
                })
                .query("_peek", |_: Record| async move {
                    Ok::<_, anyhow::Error>(Outcome::Done(vec![record! { "n" => 1 }]))
                }),
        )
        .expect("ok");

    let outcome = concepts
        .perform("Counter", "bump", record! { "a" => 1, "b" => 2 })
        .await
        .expect("ok");
    assert_eq!(outcome, Outcome::Done(record! { "seen" => 2 }));

    let peek = concepts.query("Counter", "_peek").expect("ok");
    let rows = peek.call(record! {}).await.expect("ok");
    assert_eq!(rows, Outcome::Done(vec![record! { "n" => 1 }]));
}

#[tokio::test]
async fn test_unknown_members_fault() {
    use crate::record;

    let mut concepts = Concepts::new();
    concepts.register(FnConcept::new("Empty")).expect("ok");

    assert!(matches!(
        concepts.perform("Empty", "missing", record! {}).await,
        Err(EngineError::ActionFault { .. })
    ));
    assert!(matches!(
        concepts.perform("Nowhere", "missing", record! {}).await,
        Err(EngineError::UnknownConcept(_))
    ));
    assert!(concepts.query("Nowhere", "_q").is_err());

    let handle = concepts.query("Empty", "_q").expect("ok");
    assert!(handle.call(record! {}).await.is_err());
}

#[test]
fn test_duplicate_concept() {
    let mut concepts = Concepts::new();
    concepts.register(FnConcept::new("A")).expect("ok");
    assert!(matches!(
        concepts.register(FnConcept::new("A")),
        Err(RuleError::DuplicateConcept(_))
    ));
}
