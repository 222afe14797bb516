//! The execution layer connects rules to the outside world: the
//! `Concept` contract and registry, the `Dispatcher` that runs
//! cascades against them, and `Requesting`, the concept through which
//! a transport hands requests in and reads responses back out.
mod concept;
mod dispatcher;
mod requesting;

pub use concept::Concept;
pub use concept::Concepts;
pub use concept::FnConcept;
pub use concept::QueryHandle;
pub use dispatcher::CascadeReport;
pub use dispatcher::Dispatcher;
pub use requesting::Requesting;
pub use requesting::GET_REQUEST_INPUT;
pub use requesting::GET_RESPONSE;
pub use requesting::REQUEST;
pub use requesting::REQUESTING;
pub use requesting::REQUEST_FIELD;
pub use requesting::RESPOND;
