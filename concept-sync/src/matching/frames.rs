//! `Frames` is the working relation of a rule evaluation: a multiset
//! of frames that `when` matching creates, `where` refines, and `then`
//! consumes.
//!
//! Refinement is relational.  `filter` is a selection, `bind` extends
//! every frame with a derived column, and `query` is an inner join
//! against an external query's result relation: each frame is
//! expanded into one frame per result row, and frames whose query
//! fails contribute nothing.
use super::Query;
use crate::ground::{Outcome, Value};
use crate::unification::{Frame, Template, VariableId};
use futures_util::future::try_join_all;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Frames(Vec<Frame>);

impl Frames {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A relation with exactly one frame.
    #[must_use]
    pub fn single(frame: Frame) -> Self {
        Self(vec![frame])
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.0.iter()
    }

    pub fn push(&mut self, frame: Frame) {
        self.0.push(frame);
    }

    /// Keeps the frames for which `predicate` holds.
    #[must_use]
    pub fn filter<P: FnMut(&Frame) -> bool>(self, mut predicate: P) -> Self {
        self.0.into_iter().filter(|frame| predicate(frame)).collect()
    }

    /// Binds `var` in every frame to the value `derive` computes from
    /// it.  Frames for which `derive` returns `None`, or that already
    /// bind `var` to something else, are dropped.
    #[must_use]
    pub fn bind<F>(self, var: &VariableId, mut derive: F) -> Self
    where
        F: FnMut(&Frame) -> Option<Value>,
    {
        self.0
            .into_iter()
            .filter_map(|frame| {
                let value = derive(&frame)?;
                frame.bind(var, value)
            })
            .collect()
    }

    /// Joins every frame against `query`.
    ///
    /// For each frame, `input` is instantiated with the frame's
    /// bindings and the query called with the result.  Every row the
    /// query returns is unified with `output`, starting from the frame,
    /// and each successful unification is a result frame.
    ///
    /// Frames that do not bind all of `input`'s variables are dropped
    /// without calling the query: joins only flow forward.  Frames
    /// whose call returns `Outcome::Failed` are dropped as well.
    /// Result order follows input order, but callers must not rely on
    /// it.
    ///
    /// # Errors
    ///
    /// Returns `Err` if any call faults; partial results are
    /// discarded.
    pub async fn query<Q: Query + ?Sized>(
        self,
        query: &Q,
        input: &Template,
        output: &Template,
    ) -> anyhow::Result<Frames> {
        let calls = self
            .0
            .into_iter()
            .filter_map(|frame| match input.resolve(&frame) {
                Ok(record) => Some((frame, record)),
                Err(var) => {
                    tracing::warn!(variable = %var, "query input unbound; dropping frame");
                    None
                }
            })
            .map(|(frame, record)| async move {
                let rows = match query.call(record).await? {
                    Outcome::Done(rows) => rows,
                    Outcome::Failed(message) => {
                        tracing::trace!(%message, "query failed; dropping frame");
                        Vec::new()
                    }
                };

                Ok::<_, anyhow::Error>(
                    rows.iter()
                        .filter_map(|row| output.unify(frame.clone(), row))
                        .collect::<Vec<_>>(),
                )
            });

        let expanded = try_join_all(calls).await?;
        Ok(expanded.into_iter().flatten().collect())
    }
}

/// `query(frames, fn, input, output)`: the free-standing form of
/// [`Frames::query`].
///
/// # Errors
///
/// Returns `Err` if any call faults.
pub async fn query<Q: Query + ?Sized>(
    frames: Frames,
    fun: &Q,
    input: &Template,
    output: &Template,
) -> anyhow::Result<Frames> {
    frames.query(fun, input, output).await
}

impl FromIterator<Frame> for Frames {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Frame> for Frames {
    fn extend<I: IntoIterator<Item = Frame>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl From<Vec<Frame>> for Frames {
    fn from(frames: Vec<Frame>) -> Self {
        Self(frames)
    }
}

impl IntoIterator for Frames {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Frames {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
fn rows(rows: Vec<crate::ground::Record>) -> anyhow::Result<crate::ground::QueryOutcome> {
    Ok(Outcome::Done(rows))
}

#[tokio::test]
async fn test_query_join_cardinality() {
    use crate::ground::Record;
    use crate::{record, template};

    let [a, c] = crate::vars(["a", "c"]);
    let lookup = |input: Record| async move {
        match input["a"].as_i64() {
            Some(1) => rows(vec![record! { "c" => 10 }, record! { "c" => 20 }]),
            Some(2) => rows(vec![record! { "c" => 30 }]),
            _ => rows(vec![]),
        }
    };

    let frames: Frames = vec![
        Frame::new().with(&a, 1),
        Frame::new().with(&a, 2),
        Frame::new().with(&a, 3),
    ]
    .into();

    let joined = frames
        .query(&lookup, &template! { "a" => &a }, &template! { "c" => &c })
        .await
        .expect("ok");

    // 2 + 1 + 0 rows.
    assert_eq!(joined.len(), 3);
    let pairs: Vec<_> = joined
        .iter()
        .map(|f| (f.get(&a).cloned(), f.get(&c).cloned()))
        .collect();
    assert!(pairs.contains(&(Some(Value::Int(1)), Some(Value::Int(10)))));
    assert!(pairs.contains(&(Some(Value::Int(1)), Some(Value::Int(20)))));
    assert!(pairs.contains(&(Some(Value::Int(2)), Some(Value::Int(30)))));
}

#[tokio::test]
async fn test_query_error_drops_frame() {
    use crate::ground::Record;
    use crate::template;

    let [menu, owner] = crate::vars(["menu", "owner"]);
    let lookup = |_: Record| async move {
        Ok::<crate::ground::QueryOutcome, anyhow::Error>(Outcome::failed("not found"))
    };

    let joined = Frames::single(Frame::new().with(&menu, "m1"))
        .query(&lookup, &template! { "menu" => &menu }, &template! { "owner" => &owner })
        .await
        .expect("ok");

    assert!(joined.is_empty());
}

#[tokio::test]
async fn test_query_unbound_input_drops_frame() {
    use crate::ground::Record;
    use crate::template;
    use std::sync::atomic::{AtomicUsize, Ordering};

    let [menu, owner] = crate::vars(["menu", "owner"]);
    let calls = AtomicUsize::new(0);
    let lookup = |_: Record| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { rows(vec![crate::record! { "owner" => "u1" }]) }
    };

    let joined = Frames::single(Frame::new())
        .query(&lookup, &template! { "menu" => &menu }, &template! { "owner" => &owner })
        .await
        .expect("ok");

    assert!(joined.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_query_output_literal_and_conflict() {
    use crate::ground::Record;
    use crate::{record, template};

    let [user, role] = crate::vars(["user", "role"]);
    let lookup = |_: Record| async move {
        rows(vec![
            record! { "user" => "u1", "role" => "admin" },
            record! { "user" => "u2", "role" => "admin" },
            record! { "user" => "u1", "role" => "cook" },
        ])
    };

    // `user` is already bound, so only rows that agree survive.
    let joined = Frames::single(Frame::new().with(&user, "u1"))
        .query(
            &lookup,
            &template! {},
            &template! { "user" => &user, "role" => &role },
        )
        .await
        .expect("ok");
    assert_eq!(joined.len(), 2);

    let admins = Frames::single(Frame::new().with(&user, "u1"))
        .query(
            &lookup,
            &template! {},
            &template! { "user" => &user, "role" => "admin" },
        )
        .await
        .expect("ok");
    assert_eq!(admins.len(), 1);
}

#[tokio::test]
async fn test_query_fault_propagates() {
    use crate::ground::Record;
    use crate::template;

    let lookup = |_: Record| async move {
        Err::<crate::ground::QueryOutcome, _>(anyhow::anyhow!("db down"))
    };

    let result = Frames::single(Frame::new())
        .query(&lookup, &template! {}, &template! {})
        .await;
    assert!(result.is_err());
}

#[test]
fn test_filter_and_bind() {
    let [session, user] = crate::vars(["session", "user"]);
    let frames: Frames = vec![
        Frame::new().with(&session, "s1"),
        Frame::new().with(&session, ""),
        Frame::new().with(&session, Value::Absent),
    ]
    .into();

    let valid = frames.filter(|f| f.get(&session).map_or(false, Value::is_non_empty_str));
    assert_eq!(valid.len(), 1);

    let acting = valid.bind(&user, |f| f.get(&session).cloned());
    let frame = acting.iter().next().expect("one frame");
    assert_eq!(frame.get(&user), Some(&Value::from("s1")));

    let dropped = acting.bind(&user, |_| None);
    assert!(dropped.is_empty());
}
