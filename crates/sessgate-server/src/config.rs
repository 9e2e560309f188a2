//! Server configuration.

use serde::Deserialize;
use sessgate_core::SessionConfig;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to configuration file
    pub config_path: PathBuf,
    /// Address the HTTP listener binds to
    pub listen_addr: SocketAddr,
    /// SQLite session database. In-memory sessions when unset.
    pub database_path: Option<PathBuf>,
    /// How often expired sessions are swept, in seconds
    pub cleanup_interval_secs: u64,
    /// Largest router response body the session middleware will buffer
    pub max_response_body_bytes: usize,
    /// Session filter configuration
    pub session: SessionConfig,
}

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    listen_addr: Option<String>,
    database_path: Option<PathBuf>,
    cleanup_interval_secs: Option<u64>,
    max_response_body_bytes: Option<usize>,
    session: SessionConfig,
}

impl Config {
    /// Load configuration from `$SESSGATE_DIR/config.toml` or defaults
    ///
    /// Standard directory structure:
    /// ```text
    /// ~/.sessgate/
    /// ├── config.toml           # Main configuration
    /// └── sessions.db           # Session database (when configured)
    /// ```
    pub fn load() -> anyhow::Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

        // Use SESSGATE_DIR env var if set, otherwise ~/.sessgate
        let base_dir = std::env::var("SESSGATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".sessgate"));

        std::fs::create_dir_all(&base_dir)?;
        Self::load_from(&base_dir)
    }

    /// Load configuration rooted at `base_dir`.
    pub fn load_from(base_dir: &Path) -> anyhow::Result<Self> {
        let config_path = base_dir.join("config.toml");

        let file: FileConfig = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str(&raw)?
        } else {
            FileConfig::default()
        };

        file.session.validate()?;

        let listen_addr = file
            .listen_addr
            .as_deref()
            .unwrap_or(DEFAULT_LISTEN_ADDR)
            .parse::<SocketAddr>()?;

        // Relative database paths live next to the config file
        let database_path = file.database_path.map(|path| {
            if path.is_relative() {
                base_dir.join(path)
            } else {
                path
            }
        });

        Ok(Self {
            config_path,
            listen_addr,
            database_path,
            cleanup_interval_secs: file.cleanup_interval_secs.unwrap_or(60),
            max_response_body_bytes: file
                .max_response_body_bytes
                .unwrap_or(DEFAULT_MAX_RESPONSE_BODY_BYTES),
            session: file.session,
        })
    }
}
