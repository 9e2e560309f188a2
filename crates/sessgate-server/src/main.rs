//! sessgate-server - demo HTTP server for the session filter
//!
//! Serves a small cookie-session API over axum, with sessions held in memory or
//! in SQLite.

use sessgate_core::{MemorySessionStore, SessionStore, SqliteSessionStore};
use std::sync::Arc;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod error;
mod middleware;
mod routes;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("sessgate_server=info".parse()?))
        .init();

    info!("sessgate-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = config::Config::load()?;
    info!("Config loaded from {:?}", config.config_path);

    let store: Arc<dyn SessionStore> = match &config.database_path {
        Some(path) => {
            info!(path = %path.display(), "Using SQLite session store");
            Arc::new(SqliteSessionStore::open(path)?.configured(&config.session))
        }
        None => {
            info!("Using in-memory session store");
            Arc::new(MemorySessionStore::from_config(&config.session))
        }
    };

    let state = Arc::new(state::AppState::new(config, store)?);
    spawn_cleanup(Arc::clone(&state.store), state.config.cleanup_interval_secs);

    let app = routes::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(state.config.listen_addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}

/// Periodically sweep expired sessions out of the store
fn spawn_cleanup(store: Arc<dyn SessionStore>, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(interval_secs));

        loop {
            ticker.tick().await;

            match store.cleanup_expired() {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "Swept expired sessions"),
                Err(e) => error!(error = %e, "Session cleanup failed"),
            }
        }
    });
}
