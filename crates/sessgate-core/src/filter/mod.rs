//! Request-scoped session coordination.
//!
//! - [`OncePerRequestFilter`] - runs a filter body once per physical request
//! - [`SessionFilter`] - binds a [`SessionRequest`] and commits it after the chain
//! - [`SessionCommittingResponse`] - commits the session on first response commit
//! - [`SessionCommittingDispatcher`] - commits the session before an include

mod coordinator;
mod dispatcher;
mod once_per_request;
mod response;
mod session_request;

pub use coordinator::{SESSION_STORE_ATTR, SessionFilter, SessionFilterBuilder};
pub use dispatcher::SessionCommittingDispatcher;
pub use once_per_request::{ALREADY_FILTERED_SUFFIX, OncePerRequest, OncePerRequestFilter};
pub use response::SessionCommittingResponse;
pub use session_request::{Phase, SessionHandle, SessionRequest};
