//! The synchronization engine never needs full unification: either
//! we're matching a pattern against a fully ground record (a completed
//! invocation, or a query row), or fully instantiating a template with
//! a frame.  Matching accepts a record and a frame, and returns the
//! frame extended with the pattern's fresh variables on success.
//! Instantiation accepts a frame and returns a ground record, or the
//! variable that was missing.
//!
//! Neither direction ever sees two non-ground terms, so there is no
//! occurs check and no variable-to-variable binding: a variable is
//! either unbound or bound to a `Value`.
mod frame;
mod metavariable;
mod pattern;

pub use frame::Frame;
pub use metavariable::vars;
pub use metavariable::VariableId;
pub use pattern::unify;
pub use pattern::Pattern;
pub use pattern::Slot;
pub use pattern::Template;
