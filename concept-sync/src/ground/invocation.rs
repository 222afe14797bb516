//! A completed action call is an immutable fact: "concept C performed
//! action A on this input and returned that output".  The engine
//! accumulates these facts in a per-cascade `Trace`, and every rule
//! evaluation matches against that trace.
//!
//! Trace entries are identified by their position, which doubles as a
//! causal timestamp: an entry can only have been caused by entries
//! with a smaller id.
use super::{ActionOutcome, Record};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionInvocation {
    pub concept: String,
    pub action: String,
    pub input: Record,
    pub output: ActionOutcome,
}

impl ActionInvocation {
    #[must_use]
    pub fn new(concept: &str, action: &str, input: Record, output: ActionOutcome) -> Self {
        Self {
            concept: concept.into(),
            action: action.into(),
            input,
            output,
        }
    }

    #[inline]
    #[must_use]
    pub fn is(&self, concept: &str, action: &str) -> bool {
        self.concept == concept && self.action == action
    }
}

impl fmt::Display for ActionInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.concept, self.action)
    }
}

/// Position of an invocation in its cascade's trace.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct InvocationId(u32);

impl InvocationId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why an invocation happened: which rule dispatched it, while
/// processing which earlier invocation.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Cause {
    pub rule: String,
    pub trigger: InvocationId,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TraceEntry {
    pub id: InvocationId,
    /// Number of rule firings between the root trigger and this
    /// invocation.  The root is at depth 0.
    pub depth: usize,
    /// `None` for the root trigger.
    pub cause: Option<Cause>,
    pub invocation: ActionInvocation,
}

/// The append-only record of every invocation in one cascade.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `invocation` and returns its id.  Its depth is one more
    /// than its trigger's; a cause naming an entry this trace does not
    /// hold counts as a direct child of the root.
    ///
    /// # Panics
    ///
    /// Panics if the trace would exceed `u32::MAX` entries; cascades are
    /// bounded far below that by configuration.
    pub fn push(&mut self, invocation: ActionInvocation, cause: Option<Cause>) -> InvocationId {
        let id = InvocationId(u32::try_from(self.entries.len()).expect("trace too long"));
        let depth = match &cause {
            None => 0,
            Some(cause) => self.get(cause.trigger).map_or(1, |trigger| trigger.depth + 1),
        };

        self.entries.push(TraceEntry {
            id,
            depth,
            cause,
            invocation,
        });
        id
    }

    #[must_use]
    pub fn get(&self, id: InvocationId) -> Option<&TraceEntry> {
        self.entries.get(id.index())
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceEntry> {
        self.entries.iter()
    }

    /// Returns the entries whose invocation is `concept.action`, in
    /// trace order.
    pub fn of<'a>(
        &'a self,
        concept: &'a str,
        action: &'a str,
    ) -> impl Iterator<Item = &'a TraceEntry> + 'a {
        self.entries
            .iter()
            .filter(move |entry| entry.invocation.is(concept, action))
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceEntry;
    type IntoIter = std::slice::Iter<'a, TraceEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[test]
fn test_trace_depth() {
    use super::Outcome;
    use crate::record;

    let mut trace = Trace::new();
    let root = trace.push(
        ActionInvocation::new("P", "go", record! {}, Outcome::Done(record! {})),
        None,
    );
    let child = trace.push(
        ActionInvocation::new("Q", "go", record! {}, Outcome::Done(record! {})),
        Some(Cause {
            rule: "r1".into(),
            trigger: root,
        }),
    );

    assert_eq!(trace.len(), 2);
    assert_eq!(trace.get(root).map(|e| e.depth), Some(0));
    assert_eq!(trace.get(child).map(|e| e.depth), Some(1));
    assert!(root < child);
    assert_eq!(trace.of("Q", "go").count(), 1);
    assert_eq!(trace.of("Q", "stop").count(), 0);
}

#[test]
fn test_trace_unknown_trigger() {
    use super::Outcome;
    use crate::record;

    let mut trace = Trace::new();
    let stray = trace.push(
        ActionInvocation::new("Q", "go", record! {}, Outcome::Done(record! {})),
        Some(Cause {
            rule: "r1".into(),
            trigger: InvocationId(7),
        }),
    );

    assert_eq!(trace.len(), 1);
    assert_eq!(trace.get(stray).map(|e| e.depth), Some(1));
}
