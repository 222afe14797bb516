//! Queries are the read side of the concept contract.  `where`
//! clauses join frames against them, so the matching layer only needs
//! to know how to call one: input record in, rows (or a domain error)
//! out.  A query may also fault, which is not a domain error and
//! aborts the rule being evaluated.
use crate::ground::{QueryOutcome, Record};
use async_trait::async_trait;
use std::future::Future;

#[async_trait]
pub trait Query: Send + Sync {
    async fn call(&self, input: Record) -> anyhow::Result<QueryOutcome>;
}

/// Any async closure from `Record` to an outcome is a query, which is
/// handy for stubs and for local computed relations.
#[async_trait]
impl<F, Fut> Query for F
where
    F: Fn(Record) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<QueryOutcome>> + Send + 'static,
{
    async fn call(&self, input: Record) -> anyhow::Result<QueryOutcome> {
        (self)(input).await
    }
}
