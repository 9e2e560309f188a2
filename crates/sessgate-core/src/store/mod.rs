//! Session persistence boundary.

mod memory;
#[cfg(feature = "db")]
mod sqlite;

pub use memory::MemorySessionStore;
#[cfg(feature = "db")]
pub use sqlite::SqliteSessionStore;

use crate::error::Result;
use crate::session::Session;

/// Core trait for session storage operations.
///
/// Implementations own their concurrency discipline: two requests saving the
/// same session race at the store, and the store decides how to resolve it.
pub trait SessionStore: Send + Sync {
    /// Create a new, unsaved session.
    fn create_session(&self) -> Result<Session>;

    /// Insert or update a session. Must re-key the entry when the id changed.
    fn save(&self, session: &mut Session) -> Result<()>;

    /// Find a live session by id. Expired sessions are reported as absent.
    fn find_by_id(&self, id: &str) -> Result<Option<Session>>;

    /// Delete a session. No-op when absent.
    fn delete_by_id(&self, id: &str) -> Result<()>;

    /// Drop every expired session, returning how many were removed. Stores that
    /// expire entries on their own can keep the default.
    fn cleanup_expired(&self) -> Result<usize> {
        Ok(0)
    }
}
