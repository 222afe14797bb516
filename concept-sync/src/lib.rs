//! A synchronization engine for concept-oriented applications.
//!
//! Concepts are independent services with actions and queries.  Sync
//! rules say how they interact: when some actions complete, with
//! matching inputs and outputs, refine the resulting bindings with
//! queries, then perform further actions.  The `Dispatcher` runs one
//! cascade of such reactions per root action, to a fixpoint.
pub mod combinators;
pub mod config;
pub mod error;
pub mod execution;
pub mod ground;
pub mod matching;
pub mod sync;
pub mod unification;

pub use config::EngineConfig;
pub use error::ConfigError;
pub use error::EngineError;
pub use error::RuleError;
pub use execution::CascadeReport;
pub use execution::Concept;
pub use execution::Concepts;
pub use execution::Dispatcher;
pub use execution::FnConcept;
pub use execution::Requesting;
pub use ground::ActionInvocation;
pub use ground::Outcome;
pub use ground::Record;
pub use ground::Value;
pub use matching::Frames;
pub use sync::SyncRegistry;
pub use sync::SyncRule;
pub use unification::vars;
pub use unification::Frame;
pub use unification::Pattern;
pub use unification::Slot;
pub use unification::Template;
pub use unification::VariableId;
