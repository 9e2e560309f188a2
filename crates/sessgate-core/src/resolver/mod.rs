//! Session id transport strategies.

mod cookie;
mod header;

pub use cookie::CookieSessionIdResolver;
pub use header::HeaderSessionIdResolver;

use crate::error::Result;
use crate::web::{HttpResponse, RequestHead};

/// Reads candidate session ids from a request and tells the client which id to
/// use (or to stop using one).
pub trait SessionIdResolver: Send + Sync {
    /// Candidate ids in the order the client sent them. Empty when none.
    fn resolve_session_ids(&self, request: &RequestHead) -> Result<Vec<String>>;

    /// Write or refresh the id on the response.
    fn set_session_id(
        &self,
        request: &RequestHead,
        response: &mut dyn HttpResponse,
        session_id: &str,
    ) -> Result<()>;

    /// Tell the client to drop its id.
    fn expire_session(&self, request: &RequestHead, response: &mut dyn HttpResponse)
    -> Result<()>;
}
