//! Matching turns a trace and a rule into frames.  `match_when`
//! joins the rule's `when` patterns against the trace; `Frames` is the
//! relation `where` clauses refine, including inner joins against
//! concept queries; `plan_rule` checks, once, that a rule's `then`
//! patterns can always be instantiated from the frames that survive.
mod frames;
mod plan;
mod query;
mod when;

pub use frames::query;
pub use frames::Frames;
pub use plan::plan_rule;
pub use plan::BindingPlan;
pub use query::Query;
pub use when::match_when;
