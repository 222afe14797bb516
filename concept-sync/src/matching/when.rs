//! `when` matching builds a rule's initial frames from the trace.
//!
//! Each `when` pattern is a join against the trace: start from one
//! empty frame, and for every pattern (in order), extend every current
//! frame with every trace invocation that unifies with the pattern.
//! Variables shared between patterns force the matched invocations to
//! agree, which is how a rule says "a request for this path happened,
//! and the action it asked for completed".
//!
//! Within one frame, each pattern must match a distinct invocation.
use crate::ground::Trace;
use crate::unification::{Frame, Pattern};

use super::Frames;

/// Returns every frame that matches all of `patterns` against
/// `trace`.  Each frame's provenance names the invocations it matched.
#[must_use]
pub fn match_when(trace: &Trace, patterns: &[Pattern]) -> Frames {
    let mut frames = Frames::single(Frame::new());

    for pattern in patterns {
        let mut next = Frames::new();

        for frame in &frames {
            for entry in trace.iter().filter(|entry| pattern.targets(&entry.invocation)) {
                if frame.provenance().contains(&entry.id) {
                    continue;
                }

                if let Some(extended) = pattern.unify(frame.clone(), &entry.invocation) {
                    next.push(extended.matched(entry.id));
                }
            }
        }

        if next.is_empty() {
            return next;
        }

        frames = next;
    }

    frames
}

#[cfg(test)]
fn test_trace() -> Trace {
    use crate::ground::{ActionInvocation, Outcome};
    use crate::record;

    let mut trace = Trace::new();
    trace.push(
        ActionInvocation::new(
            "Requesting",
            "request",
            record! { "path" => "/MenuCollection/createMenu", "name" => "Week 1" },
            Outcome::Done(record! { "request" => "r1" }),
        ),
        None,
    );
    trace.push(
        ActionInvocation::new(
            "MenuCollection",
            "createMenu",
            record! { "name" => "Week 1" },
            Outcome::Done(record! { "menu" => "m1" }),
        ),
        None,
    );
    trace.push(
        ActionInvocation::new(
            "MenuCollection",
            "createMenu",
            record! { "name" => "Week 2" },
            Outcome::failed("date taken"),
        ),
        None,
    );
    trace
}

#[test]
fn test_single_pattern() {
    use crate::ground::Value;
    use crate::template;

    let trace = test_trace();
    let menu = crate::VariableId::new("menu");
    let pattern =
        Pattern::new("MenuCollection", "createMenu").output(template! { "menu" => &menu });

    let frames = match_when(&trace, &[pattern]);
    assert_eq!(frames.len(), 1);
    let frame = frames.iter().next().expect("one");
    assert_eq!(frame.get(&menu), Some(&Value::from("m1")));
    assert_eq!(frame.provenance().len(), 1);
}

#[test]
fn test_join_on_shared_variable() {
    use crate::template;

    let trace = test_trace();
    let [request, name, menu, error] = crate::vars(["request", "name", "menu", "error"]);

    let request_pattern = Pattern::new("Requesting", "request")
        .input(template! { "path" => "/MenuCollection/createMenu", "name" => &name })
        .output(template! { "request" => &request });
    let created = Pattern::new("MenuCollection", "createMenu")
        .input(template! { "name" => &name })
        .output(template! { "menu" => &menu });
    let failed = Pattern::new("MenuCollection", "createMenu")
        .input(template! { "name" => &name })
        .output(template! { "error" => &error });

    let frames = match_when(&trace, &[request_pattern.clone(), created]);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames.iter().next().map(|f| f.provenance().len()), Some(2));

    // The failed createMenu was for "Week 2", which no request asked for.
    assert!(match_when(&trace, &[request_pattern, failed]).is_empty());
}

#[test]
fn test_no_candidates() {
    let trace = test_trace();
    let pattern = Pattern::new("WeeklyCart", "createCart");
    assert!(match_when(&trace, &[pattern]).is_empty());
}

#[test]
fn test_distinct_invocations_per_pattern() {
    use crate::ground::{ActionInvocation, Outcome};
    use crate::record;

    let mut trace = Trace::new();
    trace.push(
        ActionInvocation::new("A", "x", record! {}, Outcome::Done(record! {})),
        None,
    );

    let pattern = Pattern::new("A", "x");
    assert_eq!(match_when(&trace, &[pattern.clone()]).len(), 1);
    // Two patterns cannot both consume the single invocation.
    assert!(match_when(&trace, &[pattern.clone(), pattern.clone()]).is_empty());

    trace.push(
        ActionInvocation::new("A", "x", record! {}, Outcome::Done(record! {})),
        None,
    );
    // Two invocations, two orderings.
    assert_eq!(match_when(&trace, &[pattern.clone(), pattern]).len(), 2);
}
