//! Application state.

use sessgate_core::filter::{OncePerRequestFilter, SessionFilter};
use sessgate_core::SessionStore;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Session store shared by every request
    pub store: Arc<dyn SessionStore>,
    /// Session filter wrapped in the once-per-request guard
    pub sessions: Arc<OncePerRequestFilter<SessionFilter>>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn SessionStore>) -> sessgate_core::Result<Self> {
        let filter = SessionFilter::from_config(Arc::clone(&store), &config.session)?;
        Ok(Self {
            config: Arc::new(config),
            store,
            sessions: Arc::new(filter.into_filter()),
            start_time: Instant::now(),
        })
    }
}
