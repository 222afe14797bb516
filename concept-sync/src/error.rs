//! Errors are split by when they can happen.
//!
//! `RuleError`s are defects in the rule set, the concept registry or
//! the engine configuration, and surface while building rules or
//! constructing a `Dispatcher`, before any action runs.
//! `EngineError`s surface while a cascade runs.
//! Neither covers domain failures: those are `Outcome::Failed` values
//! and flow through frames like any other data.
use crate::unification::VariableId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule `{rule}` has no `when` pattern")]
    EmptyWhen { rule: String },
    #[error(
        "rule `{rule}`: `then` pattern {pattern} uses `{variable}`, \
         which neither `when` nor `where` binds"
    )]
    UnboundThenVariable {
        rule: String,
        pattern: String,
        variable: VariableId,
    },
    #[error("rule `{rule}`: `then` pattern {pattern} must not have an output template")]
    ThenOutputTemplate { rule: String, pattern: String },
    #[error("duplicate rule `{0}`")]
    DuplicateRule(String),
    #[error("duplicate concept `{0}`")]
    DuplicateConcept(String),
    #[error("rule `{rule}` refers to unknown concept `{concept}`")]
    UnknownConcept { rule: String, concept: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown concept `{0}`")]
    UnknownConcept(String),
    #[error("rule `{rule}`: `{variable}` is unbound when instantiating {pattern}")]
    UnboundVariable {
        rule: String,
        pattern: String,
        variable: VariableId,
    },
    #[error("rule `{rule}` would exceed the maximum cascade depth of {limit}")]
    CascadeDepthExceeded { rule: String, limit: usize },
    #[error("cascade exceeded {limit} invocations")]
    CascadeTooLarge { limit: usize },
    #[error("{concept}.{action} faulted: {source}")]
    ActionFault {
        concept: String,
        action: String,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
