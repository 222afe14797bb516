//! The dispatcher runs cascades.  A cascade starts from one completed
//! root invocation and propagates it through the rule set until no
//! rule has anything left to fire.
//!
//! Each cascade owns a trace and a FIFO work queue of invocations it
//! has not yet processed.  Processing a trigger evaluates every rule
//! against the trace: `match_when` finds the frames, keeping only
//! those whose provenance includes the trigger and that this rule has
//! not already fired for; `where` refines them; and every surviving
//! frame instantiates every `then` pattern.  Each dispatched action is
//! appended to the trace and queued in turn.
//!
//! Restricting frames to the current trigger, and firing each
//! combination of matched invocations at most once, is what lets the
//! loop reach a fixpoint: an acyclic rule set stops when the queue
//! drains.  Cyclic rule sets stop at the configured depth or size
//! bound, with an error.
//!
//! The queue makes propagation breadth-first, so a cascade's trace is
//! deterministic for a deterministic rule set and concept state.
use super::requesting::{REQUEST, REQUESTING, REQUEST_FIELD, RESPOND};
use super::Concepts;
use crate::config::EngineConfig;
use crate::error::{EngineError, RuleError};
use crate::ground::{ActionInvocation, Cause, InvocationId, Record, Trace, TraceEntry};
use crate::matching::{match_when, Frames};
use crate::sync::{SyncRegistry, SyncRule};
use crate::unification::{Frame, Pattern};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::Instrument;

/// Where a cascade is in its loop.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    Evaluating,
    Dispatching,
}

struct Cascade {
    trace: Trace,
    queue: VecDeque<InvocationId>,
    /// `(rule index, matched invocations)` pairs that already fired.
    fired: HashSet<(usize, Vec<InvocationId>)>,
    phase: Phase,
}

impl Cascade {
    fn new(root: ActionInvocation) -> Self {
        let mut trace = Trace::new();
        let id = trace.push(root, None);

        Self {
            trace,
            queue: VecDeque::from([id]),
            fired: HashSet::new(),
            phase: Phase::Idle,
        }
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "phase");
            self.phase = phase;
        }
    }

    /// Drops the frames that do not involve `trigger`, or whose
    /// combination of matched invocations already fired `rule`.
    fn fresh(&mut self, rule: usize, trigger: InvocationId, frames: Frames) -> Frames {
        frames.filter(|frame| {
            frame.provenance().contains(&trigger)
                && self
                    .fired
                    .insert((rule, frame.provenance().iter().copied().collect()))
        })
    }

    fn depth(&self, id: InvocationId) -> usize {
        self.trace.get(id).map_or(0, |entry| entry.depth)
    }
}

/// The completed trace of one cascade.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CascadeReport {
    trace: Trace,
}

impl CascadeReport {
    /// The invocation that started the cascade.
    #[must_use]
    pub fn root(&self) -> Option<&TraceEntry> {
        self.trace.iter().next()
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn trace(&self) -> &Trace {
        &self.trace
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn into_trace(self) -> Trace {
        self.trace
    }

    /// Returns the `concept.action` invocations, in trace order.
    pub fn find<'a>(
        &'a self,
        concept: &'a str,
        action: &'a str,
    ) -> impl Iterator<Item = &'a ActionInvocation> + 'a {
        self.trace.of(concept, action).map(|entry| &entry.invocation)
    }

    /// For a cascade rooted at `Requesting.request`, returns the input
    /// of the successful `Requesting.respond` for the same request,
    /// minus the request id.
    #[must_use]
    pub fn response(&self) -> Option<Record> {
        let root = &self.root()?.invocation;
        if !root.is(REQUESTING, REQUEST) {
            return None;
        }

        let id = root.output.done()?.get(REQUEST_FIELD)?;
        let respond = self.trace.of(REQUESTING, RESPOND).find(|entry| {
            !entry.invocation.output.is_failed()
                && entry.invocation.input.get(REQUEST_FIELD) == Some(id)
        })?;

        let mut response = respond.invocation.input.clone();
        response.remove(REQUEST_FIELD);
        Some(response)
    }

    /// Serialises the trace for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns `Err` if serialisation fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Evaluates a fixed rule set over a fixed set of concepts.  Cheap to
/// clone; clones share the concepts and rules, and each cascade owns
/// its own trace, so one dispatcher can serve concurrent cascades.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    concepts: Arc<Concepts>,
    rules: Arc<SyncRegistry>,
    config: EngineConfig,
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns `Err` if `config` has a zero bound, or if a rule refers
    /// to a concept that is not in `concepts`.
    pub fn new(
        concepts: Concepts,
        rules: SyncRegistry,
        config: EngineConfig,
    ) -> Result<Self, RuleError> {
        config.validate()?;
        rules.check_concepts(&concepts)?;

        Ok(Self {
            concepts: Arc::new(concepts),
            rules: Arc::new(rules),
            config,
        })
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn concepts(&self) -> &Arc<Concepts> {
        &self.concepts
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn rules(&self) -> &SyncRegistry {
        &self.rules
    }

    #[cfg(not(tarpaulin_include))]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Performs `concept.action` as the root of a new cascade, and runs
    /// the cascade to completion.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::on_action_completed`]; also fails if the root
    /// action itself faults.
    pub async fn invoke(
        &self,
        concept: &str,
        action: &str,
        input: Record,
    ) -> Result<CascadeReport, EngineError> {
        let output = self.concepts.perform(concept, action, input.clone()).await?;
        self.on_action_completed(ActionInvocation::new(concept, action, input, output))
            .await
    }

    /// Runs the cascade rooted at an invocation that already completed.
    /// Resolves once no rule has anything left to fire.
    ///
    /// # Errors
    ///
    /// Returns `Err` when a `then` action faults or refers to an unknown
    /// concept, when a `then` variable is unbound at run time, or when
    /// the cascade outgrows its configured bounds.  Faults inside
    /// `where` do not fail the cascade.
    pub async fn on_action_completed(
        &self,
        invocation: ActionInvocation,
    ) -> Result<CascadeReport, EngineError> {
        let span = tracing::info_span!("cascade", root = %invocation);
        self.run(Cascade::new(invocation)).instrument(span).await
    }

    /// Runs a `Requesting.request` cascade with `input`, and returns
    /// what the rules responded with, if anything.
    ///
    /// # Errors
    ///
    /// Fails like [`Dispatcher::invoke`].
    pub async fn request(&self, input: Record) -> Result<Option<Record>, EngineError> {
        let report = self.invoke(REQUESTING, REQUEST, input).await?;
        Ok(report.response())
    }

    async fn run(&self, mut cascade: Cascade) -> Result<CascadeReport, EngineError> {
        while let Some(trigger) = cascade.queue.pop_front() {
            cascade.enter(Phase::Evaluating);

            for (index, rule) in self.rules.iter().enumerate() {
                let frames = self.evaluate(&mut cascade, index, rule, trigger).await;
                if frames.is_empty() {
                    continue;
                }

                tracing::debug!(rule = rule.name(), %trigger, frames = frames.len(), "firing");
                cascade.enter(Phase::Dispatching);
                self.dispatch(&mut cascade, rule, trigger, frames).await?;
                cascade.enter(Phase::Evaluating);
            }
        }

        cascade.enter(Phase::Idle);
        tracing::debug!(invocations = cascade.trace.len(), "cascade complete");
        Ok(CascadeReport {
            trace: cascade.trace,
        })
    }

    /// Returns the frames `rule` fires for while processing `trigger`.
    async fn evaluate(
        &self,
        cascade: &mut Cascade,
        index: usize,
        rule: &SyncRule,
        trigger: InvocationId,
    ) -> Frames {
        let matched = match_when(&cascade.trace, rule.when());
        let fresh = cascade.fresh(index, trigger, matched);
        if fresh.is_empty() {
            return fresh;
        }

        match rule.refine(fresh, &self.concepts).await {
            Ok(frames) => frames,
            Err(error) => {
                tracing::error!(
                    rule = rule.name(),
                    %trigger,
                    error = %error,
                    "where clause faulted; skipping rule"
                );
                Frames::new()
            }
        }
    }

    async fn dispatch(
        &self,
        cascade: &mut Cascade,
        rule: &SyncRule,
        trigger: InvocationId,
        frames: Frames,
    ) -> Result<(), EngineError> {
        let depth = cascade.depth(trigger) + 1;
        if depth > self.config.max_cascade_depth {
            tracing::error!(rule = rule.name(), depth, "cascade too deep");
            return Err(EngineError::CascadeDepthExceeded {
                rule: rule.name().into(),
                limit: self.config.max_cascade_depth,
            });
        }

        for frame in &frames {
            if self.config.log_frames {
                tracing::debug!(rule = rule.name(), %frame, "frame");
            }

            for pattern in rule.then() {
                if cascade.trace.len() >= self.config.max_invocations {
                    tracing::error!(rule = rule.name(), "cascade too large");
                    return Err(EngineError::CascadeTooLarge {
                        limit: self.config.max_invocations,
                    });
                }

                let invocation = self.perform(rule, pattern, frame).await?;
                let id = cascade.trace.push(
                    invocation,
                    Some(Cause {
                        rule: rule.name().into(),
                        trigger,
                    }),
                );
                cascade.queue.push_back(id);
            }
        }

        Ok(())
    }

    async fn perform(
        &self,
        rule: &SyncRule,
        pattern: &Pattern,
        frame: &Frame,
    ) -> Result<ActionInvocation, EngineError> {
        // Fields bound to `Absent` are left out, so the concept sees
        // the same optional field missing rather than a null.
        let input = pattern
            .input
            .resolve(frame)
            .map_err(|variable| EngineError::UnboundVariable {
                rule: rule.name().into(),
                pattern: pattern.to_string(),
                variable,
            })?;

        let output = self
            .concepts
            .perform(&pattern.concept, &pattern.member, input.clone())
            .await?;
        tracing::debug!(
            rule = rule.name(),
            action = %pattern,
            failed = output.is_failed(),
            "dispatched"
        );

        Ok(ActionInvocation::new(
            &pattern.concept,
            &pattern.member,
            input,
            output,
        ))
    }
}

#[cfg(test)]
mod fixtures {
    use crate::execution::FnConcept;
    use crate::ground::{Outcome, Record};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A concept whose actions all succeed, echoing their input.
    pub fn echo(name: &str, actions: &[&str]) -> FnConcept {
        actions.iter().fold(FnConcept::new(name), |concept, action| {
            concept.action(action, |input: Record| async move {
                Ok::<_, anyhow::Error>(Outcome::Done(input))
            })
        })
    }

    /// An echoing action that also counts its calls.
    pub fn spy(concept: FnConcept, action: &str, calls: &Arc<AtomicUsize>) -> FnConcept {
        let calls = Arc::clone(calls);
        concept.action(action, move |input: Record| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, anyhow::Error>(Outcome::Done(input)) }
        })
    }
}

#[cfg(test)]
fn dispatcher(concepts: Vec<super::FnConcept>, rules: Vec<SyncRule>) -> Dispatcher {
    dispatcher_with(concepts, rules, EngineConfig::default())
}

#[cfg(test)]
fn dispatcher_with(
    concepts: Vec<super::FnConcept>,
    rules: Vec<SyncRule>,
    config: EngineConfig,
) -> Dispatcher {
    let mut registry = Concepts::new();
    for concept in concepts {
        registry.register(concept).expect("ok");
    }

    let rules = SyncRegistry::from_rules(rules.into_iter().map(Ok)).expect("ok");
    Dispatcher::new(registry, rules, config).expect("ok")
}

#[tokio::test]
async fn test_scenario_a_single_firing() {
    use crate::{record, template};
    use fixtures::echo;

    let [a, b] = crate::vars(["a", "b"]);
    let rule = SyncRule::builder("XtoY")
        .when(Pattern::new("ActionX", "run").input(template! { "a" => &a, "b" => &b }))
        .refine(|frames, _| async move { Ok::<_, anyhow::Error>(frames) })
        .then(Pattern::new("ActionY", "run").input(template! { "a" => &a }))
        .build()
        .expect("ok");

    let dispatcher = dispatcher(
        vec![echo("ActionX", &["run"]), echo("ActionY", &["run"])],
        vec![rule],
    );
    let report = dispatcher
        .invoke("ActionX", "run", record! { "a" => 1, "b" => 2 })
        .await
        .expect("ok");

    let fired: Vec<_> = report.find("ActionY", "run").collect();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].input, record! { "a" => 1 });
}

#[tokio::test]
async fn test_scenario_b_join_fans_out() {
    use crate::execution::FnConcept;
    use crate::ground::Outcome;
    use crate::{record, template};
    use fixtures::echo;

    let [a, c] = crate::vars(["a", "c"]);
    let rule = {
        let (a, c) = (a.clone(), c.clone());
        SyncRule::builder("Fanout")
            .when(Pattern::new("ActionX", "run").input(template! { "a" => &a }))
            .binds([&c])
            .refine({
                let (a, c) = (a.clone(), c.clone());
                move |frames, concepts| {
                    let (a, c) = (a.clone(), c.clone());
                    async move {
                        let items = concepts.query("Catalog", "_items")?;
                        frames
                            .query(&items, &template! { "a" => &a }, &template! { "c" => &c })
                            .await
                    }
                }
            })
            .then(Pattern::new("ActionY", "run").input(template! { "a" => &a, "c" => &c }))
            .build()
            .expect("ok")
    };

    let catalog = FnConcept::new("Catalog").query("_items", |_: Record| async move {
        let rows = vec![record! { "c" => 10 }, record! { "c" => 20 }];
        Ok::<_, anyhow::Error>(Outcome::Done(rows))
    });
    let dispatcher = dispatcher(
        vec![echo("ActionX", &["run"]), echo("ActionY", &["run"]), catalog],
        vec![rule],
    );

    let report = dispatcher
        .invoke("ActionX", "run", record! { "a" => 1 })
        .await
        .expect("ok");
    let mut inputs: Vec<_> = report
        .find("ActionY", "run")
        .map(|inv| inv.input.clone())
        .collect();
    inputs.sort_by_key(|input| input.get("c").and_then(crate::ground::Value::as_i64));
    assert_eq!(
        inputs,
        vec![record! { "a" => 1, "c" => 10 }, record! { "a" => 1, "c" => 20 }]
    );
}

#[tokio::test]
async fn test_scenario_c_query_error_drops_frame() {
    use crate::execution::FnConcept;
    use crate::ground::Outcome;
    use crate::{record, template};
    use fixtures::{echo, spy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    let [a, c] = crate::vars(["a", "c"]);
    let rule = {
        let (a, c) = (a.clone(), c.clone());
        SyncRule::builder("Lookup")
            .when(Pattern::new("ActionX", "run").input(template! { "a" => &a }))
            .binds([&c])
            .refine({
                let (a, c) = (a.clone(), c.clone());
                move |frames, concepts| {
                    let (a, c) = (a.clone(), c.clone());
                    async move {
                        let lookup = concepts.query("Catalog", "_lookup")?;
                        frames
                            .query(&lookup, &template! { "a" => &a }, &template! { "c" => &c })
                            .await
                    }
                }
            })
            .then(Pattern::new("ActionY", "run").input(template! { "c" => &c }))
            .build()
            .expect("ok")
    };

    let calls = Arc::new(AtomicUsize::new(0));
    let catalog = FnConcept::new("Catalog").query("_lookup", |_: Record| async move {
        Ok::<crate::ground::QueryOutcome, anyhow::Error>(Outcome::failed("not found"))
    });
    let dispatcher = dispatcher(
        vec![
            echo("ActionX", &["run"]),
            spy(super::FnConcept::new("ActionY"), "run", &calls),
            catalog,
        ],
        vec![rule],
    );

    let report = dispatcher
        .invoke("ActionX", "run", record! { "a" => 1 })
        .await
        .expect("ok");
    assert_eq!(report.trace().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_scenario_d_cascade_order() {
    use crate::{record, template};
    use fixtures::echo;

    let n = crate::VariableId::new("n");
    let r1 = SyncRule::builder("R1")
        .when(Pattern::new("P", "go").input(template! { "n" => &n }))
        .then(Pattern::new("Q", "go").input(template! { "n" => &n }))
        .build()
        .expect("ok");
    let r2 = SyncRule::builder("R2")
        .when(Pattern::new("Q", "go").input(template! { "n" => &n }))
        .then(Pattern::new("S", "go").input(template! { "n" => &n }))
        .build()
        .expect("ok");

    // Registration order is the reverse of causal order.
    let dispatcher = dispatcher(
        vec![echo("P", &["go"]), echo("Q", &["go"]), echo("S", &["go"])],
        vec![r2, r1],
    );
    let report = dispatcher
        .invoke("P", "go", record! { "n" => 7 })
        .await
        .expect("ok");

    let order: Vec<_> = report
        .trace()
        .iter()
        .map(|entry| (entry.invocation.concept.as_str(), entry.depth))
        .collect();
    assert_eq!(order, vec![("P", 0), ("Q", 1), ("S", 2)]);

    let causes: Vec<_> = report
        .trace()
        .iter()
        .filter_map(|entry| entry.cause.as_ref().map(|cause| cause.rule.as_str()))
        .collect();
    assert_eq!(causes, vec!["R1", "R2"]);
}

#[tokio::test]
async fn test_no_match_no_effect() {
    use crate::{record, template};
    use fixtures::{echo, spy};
    use std::sync::atomic::{AtomicUsize, Ordering};

    let a = crate::VariableId::new("a");
    let rule = SyncRule::builder("OnlyCreate")
        .when(Pattern::new("ActionX", "create").input(template! { "a" => &a }))
        .then(Pattern::new("ActionY", "run").input(template! { "a" => &a }))
        .build()
        .expect("ok");

    let calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = dispatcher(
        vec![
            echo("ActionX", &["create", "delete"]),
            spy(super::FnConcept::new("ActionY"), "run", &calls),
        ],
        vec![rule],
    );

    dispatcher
        .invoke("ActionX", "delete", record! { "a" => 1 })
        .await
        .expect("ok");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_outputs_match_error_rules() {
    use crate::execution::FnConcept;
    use crate::ground::Outcome;
    use crate::{record, template};
    use fixtures::echo;

    let [name, menu, error] = crate::vars(["name", "menu", "error"]);
    let created = SyncRule::builder("Created")
        .when(
            Pattern::new("Menus", "create")
                .input(template! { "name" => &name })
                .output(template! { "menu" => &menu }),
        )
        .then(Pattern::new("Log", "ok").input(template! { "menu" => &menu }))
        .build()
        .expect("ok");
    let failed = SyncRule::builder("Failed")
        .when(
            Pattern::new("Menus", "create")
                .input(template! { "name" => &name })
                .output(template! { "error" => &error }),
        )
        .then(Pattern::new("Log", "error").input(template! { "error" => &error }))
        .build()
        .expect("ok");

    let menus = FnConcept::new("Menus").action("create", |_: Record| async move {
        Ok::<_, anyhow::Error>(Outcome::failed("date taken"))
    });
    let dispatcher = dispatcher(
        vec![menus, echo("Log", &["ok", "error"])],
        vec![created, failed],
    );

    let report = dispatcher
        .invoke("Menus", "create", record! { "name" => "Week 1" })
        .await
        .expect("ok");
    assert!(report.root().map_or(false, |root| root.invocation.output.is_failed()));
    assert_eq!(report.find("Log", "ok").count(), 0);
    let errors: Vec<_> = report.find("Log", "error").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].input, record! { "error" => "date taken" });
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    use crate::{record, template};
    use fixtures::echo;

    let n = crate::VariableId::new("n");
    let build = || {
        vec![
            SyncRule::builder("A")
                .when(Pattern::new("P", "go").input(template! { "n" => &n }))
                .then(Pattern::new("Q", "go").input(template! { "n" => &n }))
                .then(Pattern::new("S", "go").input(template! { "n" => &n }))
                .build()
                .expect("ok"),
            SyncRule::builder("B")
                .when(Pattern::new("Q", "go").input(template! { "n" => &n }))
                .then(Pattern::new("S", "go").input(template! { "n" => &n }))
                .build()
                .expect("ok"),
        ]
    };
    let concepts = || vec![echo("P", &["go"]), echo("Q", &["go"]), echo("S", &["go"])];

    let first = dispatcher(concepts(), build())
        .invoke("P", "go", record! { "n" => 1 })
        .await
        .expect("ok");
    let second = dispatcher(concepts(), build())
        .invoke("P", "go", record! { "n" => 1 })
        .await
        .expect("ok");

    assert_eq!(first, second);
    assert_eq!(first.find("S", "go").count(), 2);
    assert_eq!(first.to_json().expect("ok"), second.to_json().expect("ok"));
}

#[tokio::test]
async fn test_cyclic_rule_hits_depth_bound() {
    use crate::{record, template};
    use fixtures::echo;

    let n = crate::VariableId::new("n");
    let rule = SyncRule::builder("Loop")
        .when(Pattern::new("P", "go").input(template! { "n" => &n }))
        .then(Pattern::new("P", "go").input(template! { "n" => &n }))
        .build()
        .expect("ok");

    let config = EngineConfig {
        max_cascade_depth: 3,
        ..EngineConfig::default()
    };
    let dispatcher = dispatcher_with(vec![echo("P", &["go"])], vec![rule], config);
    assert!(matches!(
        dispatcher.invoke("P", "go", record! { "n" => 1 }).await,
        Err(EngineError::CascadeDepthExceeded { limit: 3, .. })
    ));
}

#[tokio::test]
async fn test_fan_out_hits_size_bound() {
    use crate::{record, template};
    use fixtures::echo;

    let n = crate::VariableId::new("n");
    let rule = SyncRule::builder("Double")
        .when(Pattern::new("P", "go").input(template! { "n" => &n }))
        .then(Pattern::new("P", "go").input(template! { "n" => &n }))
        .then(Pattern::new("P", "go").input(template! { "n" => &n }))
        .build()
        .expect("ok");

    let config = EngineConfig {
        max_invocations: 5,
        ..EngineConfig::default()
    };
    let dispatcher = dispatcher_with(vec![echo("P", &["go"])], vec![rule], config);
    assert!(matches!(
        dispatcher.invoke("P", "go", record! { "n" => 1 }).await,
        Err(EngineError::CascadeTooLarge { limit: 5 })
    ));
}

#[tokio::test]
async fn test_two_pattern_when_fires_once_on_late_half() {
    use crate::ground::Outcome;
    use crate::{record, template};
    use fixtures::echo;

    let [x, y] = crate::vars(["x", "y"]);
    let chain = SyncRule::builder("Chain")
        .when(Pattern::new("A", "make"))
        .then(Pattern::new("B", "make"))
        .build()
        .expect("ok");
    let start = SyncRule::builder("Start")
        .when(Pattern::new("Root", "go"))
        .then(Pattern::new("A", "make"))
        .build()
        .expect("ok");
    let join = SyncRule::builder("Join")
        .when(Pattern::new("A", "make").output(template! { "x" => &x }))
        .when(Pattern::new("B", "make").output(template! { "y" => &y }))
        .then(Pattern::new("C", "join").input(template! { "x" => &x, "y" => &y }))
        .build()
        .expect("ok");

    let a = super::FnConcept::new("A").action("make", |_: Record| async move {
        Ok::<_, anyhow::Error>(Outcome::Done(record! { "x" => 1 }))
    });
    let b = super::FnConcept::new("B").action("make", |_: Record| async move {
        Ok::<_, anyhow::Error>(Outcome::Done(record! { "y" => 2 }))
    });
    let dispatcher = dispatcher(
        vec![echo("Root", &["go"]), a, b, echo("C", &["join"])],
        vec![join, chain, start],
    );

    let report = dispatcher.invoke("Root", "go", record! {}).await.expect("ok");
    let joined: Vec<_> = report.find("C", "join").collect();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].input, record! { "x" => 1, "y" => 2 });
}

#[tokio::test]
async fn test_where_fault_skips_only_that_rule() {
    use crate::{record, template};
    use fixtures::echo;

    let a = crate::VariableId::new("a");
    let broken = SyncRule::builder("Broken")
        .when(Pattern::new("ActionX", "run").input(template! { "a" => &a }))
        .refine(|_, _| async move {
            Err::<Frames, _>(anyhow::anyhow!("database unavailable"))
        })
        .then(Pattern::new("ActionY", "broken").input(template! { "a" => &a }))
        .build()
        .expect("ok");
    let healthy = SyncRule::builder("Healthy")
        .when(Pattern::new("ActionX", "run").input(template! { "a" => &a }))
        .then(Pattern::new("ActionY", "healthy").input(template! { "a" => &a }))
        .build()
        .expect("ok");

    let dispatcher = dispatcher(
        vec![echo("ActionX", &["run"]), echo("ActionY", &["broken", "healthy"])],
        vec![broken, healthy],
    );
    let report = dispatcher
        .invoke("ActionX", "run", record! { "a" => 1 })
        .await
        .expect("ok");
    assert_eq!(report.find("ActionY", "broken").count(), 0);
    assert_eq!(report.find("ActionY", "healthy").count(), 1);
}

#[tokio::test]
async fn test_then_fault_aborts_cascade() {
    use crate::execution::FnConcept;
    use crate::ground::ActionOutcome;
    use crate::{record, template};
    use fixtures::echo;

    let a = crate::VariableId::new("a");
    let rule = SyncRule::builder("Crash")
        .when(Pattern::new("ActionX", "run").input(template! { "a" => &a }))
        .then(Pattern::new("ActionY", "run").input(template! { "a" => &a }))
        .build()
        .expect("ok");

    let crashing = FnConcept::new("ActionY").action("run", |_: Record| async move {
        Err::<ActionOutcome, _>(anyhow::anyhow!("connection reset"))
    });
    let dispatcher = dispatcher(vec![echo("ActionX", &["run"]), crashing], vec![rule]);
    assert!(matches!(
        dispatcher.invoke("ActionX", "run", record! { "a" => 1 }).await,
        Err(EngineError::ActionFault { .. })
    ));
}

#[tokio::test]
async fn test_undelivered_where_binding() {
    use crate::{record, template};
    use fixtures::echo;

    let [a, owner] = crate::vars(["a", "owner"]);
    let rule = SyncRule::builder("Forgetful")
        .when(Pattern::new("ActionX", "run").input(template! { "a" => &a }))
        .binds([&owner])
        .then(Pattern::new("ActionY", "run").input(template! { "owner" => &owner }))
        .build()
        .expect("ok");

    let dispatcher = dispatcher(
        vec![echo("ActionX", &["run"]), echo("ActionY", &["run"])],
        vec![rule],
    );
    match dispatcher.invoke("ActionX", "run", record! { "a" => 1 }).await {
        Err(EngineError::UnboundVariable { variable, .. }) => assert_eq!(variable, owner),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_request_response_round_trip() {
    use super::Requesting;
    use crate::{record, template};

    let [request, message] = crate::vars(["request", "message"]);
    let rule = SyncRule::builder("Echo")
        .when(
            Pattern::new(REQUESTING, REQUEST)
                .input(template! { "path" => "/echo", "message" => &message })
                .output(template! { "request" => &request }),
        )
        .then(
            Pattern::new(REQUESTING, RESPOND)
                .input(template! { "request" => &request, "message" => &message }),
        )
        .build()
        .expect("ok");

    let mut concepts = Concepts::new();
    concepts.register(Requesting::new()).expect("ok");
    let rules = SyncRegistry::from_rules(vec![Ok(rule)]).expect("ok");
    let dispatcher = Dispatcher::new(concepts, rules, EngineConfig::default()).expect("ok");

    let response = dispatcher
        .request(record! { "path" => "/echo", "message" => "hi" })
        .await
        .expect("ok");
    assert_eq!(response, Some(record! { "message" => "hi" }));

    let unanswered = dispatcher
        .request(record! { "path" => "/elsewhere", "message" => "hi" })
        .await
        .expect("ok");
    assert_eq!(unanswered, None);
}

#[test]
fn test_dispatcher_checks_concepts() {
    let rule = SyncRule::builder("Orphan")
        .when(Pattern::new("Missing", "run"))
        .build()
        .expect("ok");
    let rules = SyncRegistry::from_rules(vec![Ok(rule)]).expect("ok");
    assert!(matches!(
        Dispatcher::new(Concepts::new(), rules, EngineConfig::default()),
        Err(RuleError::UnknownConcept { .. })
    ));
}

#[test]
fn test_dispatcher_validates_config() {
    let config = EngineConfig {
        max_invocations: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        Dispatcher::new(Concepts::new(), SyncRegistry::new(), config),
        Err(RuleError::Config(crate::ConfigError::Invalid(_)))
    ));
}

#[tokio::test]
async fn test_missing_when_field_stays_missing_in_then() {
    use crate::{record, template};
    use fixtures::echo;

    let [menu, name] = crate::vars(["menu", "name"]);
    let rule = SyncRule::builder("Rename")
        .when(Pattern::new("Req", "go").input(template! { "menu" => &menu, "name" => &name }))
        .then(Pattern::new("Menus", "update").input(template! { "menu" => &menu, "name" => &name }))
        .build()
        .expect("ok");

    let dispatcher = dispatcher(
        vec![echo("Req", &["go"]), echo("Menus", &["update"])],
        vec![rule],
    );
    let report = dispatcher
        .invoke("Req", "go", record! { "menu" => "m1" })
        .await
        .expect("ok");

    let updates: Vec<_> = report.find("Menus", "update").collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].input, record! { "menu" => "m1" });
}

#[tokio::test]
async fn test_integral_float_joins_with_int_row() {
    use crate::execution::FnConcept;
    use crate::ground::{Outcome, Value};
    use crate::template;
    use fixtures::echo;

    let [q, c] = crate::vars(["q", "c"]);
    let rule = {
        let (q, c) = (q.clone(), c.clone());
        SyncRule::builder("Out")
            .when(Pattern::new("Req", "go").input(template! { "q" => &q }))
            .binds([&c])
            .refine({
                let (q, c) = (q.clone(), c.clone());
                move |frames, concepts| {
                    let (q, c) = (q.clone(), c.clone());
                    async move {
                        let rows = concepts.query("Store", "_all")?;
                        frames
                            .query(&rows, &template! {}, &template! { "q" => &q, "c" => &c })
                            .await
                    }
                }
            })
            .then(Pattern::new("Out", "emit").input(template! { "c" => &c }))
            .build()
            .expect("ok")
    };

    let store = FnConcept::new("Store").query("_all", |_: Record| async move {
        let rows = vec![crate::record! { "q" => 2, "c" => 1 }];
        Ok::<_, anyhow::Error>(Outcome::Done(rows))
    });
    let dispatcher = dispatcher(
        vec![echo("Req", &["go"]), echo("Out", &["emit"]), store],
        vec![rule],
    );

    let input = match Value::from(serde_json::json!({ "q": 2.0 })) {
        Value::Record(input) => input,
        other => panic!("unexpected {:?}", other),
    };
    let report = dispatcher.invoke("Req", "go", input).await.expect("ok");
    assert_eq!(report.find("Out", "emit").count(), 1);
}

#[tokio::test]
async fn test_rule_reads_optional_request_fields() {
    use super::requesting::GET_REQUEST_INPUT;
    use super::Requesting;
    use crate::{record, template};

    let [request, recipe, input] = crate::vars(["request", "recipe", "input"]);
    let rule = {
        let (request, input) = (request.clone(), input.clone());
        SyncRule::builder("UpdateRecipe")
            .when(
                Pattern::new(REQUESTING, REQUEST)
                    .input(template! { "path" => "/updateRecipe", "recipe" => &recipe })
                    .output(template! { "request" => &request }),
            )
            .binds([&input])
            .refine({
                let (request, input) = (request.clone(), input.clone());
                move |frames, concepts| {
                    let (request, input) = (request.clone(), input.clone());
                    async move {
                        let inputs = concepts.query(REQUESTING, GET_REQUEST_INPUT)?;
                        frames
                            .query(
                                &inputs,
                                &template! { "request" => &request },
                                &template! { "input" => &input },
                            )
                            .await
                    }
                }
            })
            .then(
                Pattern::new(REQUESTING, RESPOND)
                    .input(template! { "request" => &request, "updated" => &input }),
            )
            .build()
            .expect("ok")
    };

    let mut concepts = Concepts::new();
    concepts.register(Requesting::new()).expect("ok");
    let rules = SyncRegistry::from_rules(vec![Ok(rule)]).expect("ok");
    let dispatcher = Dispatcher::new(concepts, rules, EngineConfig::default()).expect("ok");

    let body = record! { "path" => "/updateRecipe", "recipe" => "r1", "title" => "Soup" };
    let response = dispatcher.request(body.clone()).await.expect("ok");
    assert_eq!(response, Some(record! { "updated" => body }));
}
