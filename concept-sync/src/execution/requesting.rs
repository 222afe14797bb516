//! `Requesting` is the response sink between a transport and the
//! rule set.  A transport turns an inbound request into a
//! `Requesting.request` action; rules that observe it (and whatever
//! it caused) eventually dispatch `Requesting.respond` with the same
//! `request` id.  The transport awaits the cascade and reads the
//! response back.
//!
//! The input of every request is kept under its id, so rules can read
//! optional fields their `when` pattern does not name through
//! `_getRequestInput`.
use super::Concept;
use crate::ground::{ActionOutcome, Outcome, QueryOutcome, Record, Value};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub const REQUESTING: &str = "Requesting";
pub const REQUEST: &str = "request";
pub const RESPOND: &str = "respond";
pub const GET_RESPONSE: &str = "_getResponse";
pub const GET_REQUEST_INPUT: &str = "_getRequestInput";

/// The field carrying the request id on both actions.
pub const REQUEST_FIELD: &str = "request";

#[derive(Debug, Default)]
pub struct Requesting {
    next_id: AtomicU64,
    pending: RwLock<HashSet<String>>,
    inputs: RwLock<HashMap<String, Record>>,
    responses: RwLock<HashMap<String, Record>>,
}

impl Requesting {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn request(&self, input: Record) -> ActionOutcome {
        let id = format!("request-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.pending.write().await.insert(id.clone());
        self.inputs.write().await.insert(id.clone(), input);

        let mut output = Record::new();
        output.insert(REQUEST_FIELD.into(), Value::Str(id));
        Outcome::Done(output)
    }

    async fn respond(&self, mut input: Record) -> ActionOutcome {
        let id = match input.remove(REQUEST_FIELD) {
            Some(Value::Str(id)) => id,
            _ => return Outcome::failed("respond requires a request id"),
        };

        if !self.pending.write().await.remove(&id) {
            return Outcome::failed(format!("no pending request `{}`", id));
        }

        self.responses.write().await.insert(id.clone(), input);

        let mut output = Record::new();
        output.insert(REQUEST_FIELD.into(), Value::Str(id));
        Outcome::Done(output)
    }

    async fn get_response(&self, input: &Record) -> QueryOutcome {
        let id = match input.get(REQUEST_FIELD).and_then(Value::as_str) {
            Some(id) => id,
            None => return Outcome::failed("_getResponse requires a request id"),
        };

        let rows = self
            .responses
            .read()
            .await
            .get(id)
            .map(|response| {
                let mut row = Record::new();
                row.insert("response".into(), Value::Record(response.clone()));
                row
            })
            .into_iter()
            .collect();
        Outcome::Done(rows)
    }

    /// Returns the whole input of a request as `{input}`.  Unknown ids
    /// fail, since every id handed out has an input.
    async fn get_request_input(&self, input: &Record) -> QueryOutcome {
        let id = match input.get(REQUEST_FIELD).and_then(Value::as_str) {
            Some(id) => id,
            None => return Outcome::failed("_getRequestInput requires a request id"),
        };

        match self.inputs.read().await.get(id) {
            Some(request) => {
                let mut row = Record::new();
                row.insert("input".into(), Value::Record(request.clone()));
                Outcome::Done(vec![row])
            }
            None => Outcome::failed(format!("unknown request `{}`", id)),
        }
    }
}

#[async_trait]
impl Concept for Requesting {
    fn name(&self) -> &str {
        REQUESTING
    }

    async fn perform(&self, action: &str, input: Record) -> anyhow::Result<ActionOutcome> {
        match action {
            REQUEST => Ok(self.request(input).await),
            RESPOND => Ok(self.respond(input).await),
            _ => Err(anyhow::anyhow!("Requesting has no action `{}`", action)),
        }
    }

    async fn query(&self, query: &str, input: Record) -> anyhow::Result<QueryOutcome> {
        match query {
            GET_RESPONSE => Ok(self.get_response(&input).await),
            GET_REQUEST_INPUT => Ok(self.get_request_input(&input).await),
            _ => Err(anyhow::anyhow!("Requesting has no query `{}`", query)),
        }
    }
}

#[tokio::test]
async fn test_request_respond() {
    use crate::record;

    let requesting = Requesting::new();
    let output = requesting
        .perform(REQUEST, record! { "path" => "/x" })
        .await
        .expect("ok");
    let id = output.done().and_then(|r| r.get("request")).cloned().expect("id");

    let none = requesting
        .query(GET_RESPONSE, record! { "request" => id.clone() })
        .await
        .expect("ok");
    assert_eq!(none, Outcome::Done(vec![]));

    let responded = requesting
        .perform(RESPOND, record! { "request" => id.clone(), "menu" => "m1" })
        .await
        .expect("ok");
    assert!(!responded.is_failed());

    let rows = requesting
        .query(GET_RESPONSE, record! { "request" => id.clone() })
        .await
        .expect("ok");
    assert_eq!(
        rows,
        Outcome::Done(vec![record! { "response" => record! { "menu" => "m1" } }])
    );

    // A request is answered at most once.
    let again = requesting
        .perform(RESPOND, record! { "request" => id, "menu" => "m2" })
        .await
        .expect("ok");
    assert!(again.is_failed());
}

#[tokio::test]
async fn test_get_request_input() {
    use crate::record;

    let requesting = Requesting::new();
    let input = record! { "path" => "/updateRecipe", "recipe" => "r1", "title" => "Soup" };
    let output = requesting
        .perform(REQUEST, input.clone())
        .await
        .expect("ok");
    let id = output.done().and_then(|r| r.get("request")).cloned().expect("id");

    let rows = requesting
        .query(GET_REQUEST_INPUT, record! { "request" => id.clone() })
        .await
        .expect("ok");
    assert_eq!(rows, Outcome::Done(vec![record! { "input" => input }]));

    // Still readable once the request is answered.
    requesting
        .perform(RESPOND, record! { "request" => id.clone() })
        .await
        .expect("ok");
    let rows = requesting
        .query(GET_REQUEST_INPUT, record! { "request" => id })
        .await
        .expect("ok");
    assert_eq!(rows.done().map(Vec::len), Some(1));

    let unknown = requesting
        .query(GET_REQUEST_INPUT, record! { "request" => "request-99" })
        .await
        .expect("ok");
    assert!(unknown.is_failed());
}

#[tokio::test]
async fn test_respond_unknown_request() {
    use crate::record;

    let requesting = Requesting::new();
    let outcome = requesting
        .perform(RESPOND, record! { "request" => "request-99" })
        .await
        .expect("ok");
    assert!(outcome.is_failed());

    assert!(requesting.perform("shout", record! {}).await.is_err());
}
