//! The synchronization engine observes concepts only through the
//! records they accept and return.  These records are "ground" data:
//! concrete, comparable domain values with no pattern variables in
//! them.  Everything the engine matches against (completed action
//! invocations, query result rows) and everything it produces (the
//! inputs of dispatched actions) lives at this level.
//!
//! Ground data is deliberately dumb.  Shape information (which fields
//! a pattern cares about, which variables they bind) is tracked one
//! level up, in `unification`, so that the same record can be matched
//! against many patterns without being re-interpreted.

mod invocation;
mod record;
mod value;

pub use invocation::ActionInvocation;
pub use invocation::Cause;
pub use invocation::InvocationId;
pub use invocation::Trace;
pub use invocation::TraceEntry;
pub use record::ActionOutcome;
pub use record::Outcome;
pub use record::QueryOutcome;
pub use record::Record;
pub use record::ERROR_FIELD;
pub use value::Value;
