//! sessgate-core - Request-scoped session coordination
//!
//! This crate binds a session to each HTTP request and persists it at the last
//! moment the response can still carry a session id:
//!
//! - **filter**: Once-per-request guard, session filter and its request/response views
//! - **session**: The session model and attribute bookkeeping
//! - **store**: Session persistence (in-memory, SQLite behind the `db` feature)
//! - **resolver**: Session id transport (cookie, header)
//! - **web**: Minimal request/response/filter-chain model the filter runs on
//! - **config**: Session, cookie and header configuration

pub mod config;
pub mod error;
pub mod filter;
pub mod resolver;
pub mod session;
pub mod store;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::{FlushMode, SaveMode, SessionConfig};
pub use error::{Error, Result};
pub use filter::{OncePerRequestFilter, SessionFilter, SessionHandle, SessionRequest};
pub use resolver::{CookieSessionIdResolver, HeaderSessionIdResolver, SessionIdResolver};
pub use session::Session;
pub use store::{MemorySessionStore, SessionStore};

#[cfg(feature = "db")]
pub use store::SqliteSessionStore;
