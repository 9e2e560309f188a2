//! Session configuration
//!
//! Defines how sessions expire, when they are flushed to the store, and how the
//! session id travels between client and server.

use chrono::TimeDelta;
use http::HeaderName;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::resolver::{CookieSessionIdResolver, HeaderSessionIdResolver, SessionIdResolver};
use crate::session::DEFAULT_MAX_INACTIVE_INTERVAL_SECONDS;

/// Upper bound for configured durations (100 years), so timestamp arithmetic
/// cannot overflow.
pub const MAX_DURATION_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// When session changes are written to the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Save once, when the response commits (or the chain completes).
    #[default]
    OnSave,
    /// Also save after every mutating session call.
    Immediate,
}

/// Which attributes a store writes back on save.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Only attributes set or removed during the request.
    #[default]
    OnSetAttribute,
    /// Attributes that were read or written during the request.
    OnGetAttribute,
    /// Every attribute, replacing whatever the store holds.
    Always,
}

/// `SameSite` cookie attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Session configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle timeout in seconds for new sessions (default: 1800). Negative never expires.
    pub max_inactive_interval_secs: i64,

    /// When changes are flushed to the store (default: on_save)
    pub flush_mode: FlushMode,

    /// Which attributes are written back on save (default: on_set_attribute)
    pub save_mode: SaveMode,

    /// How the session id is carried
    pub resolver: ResolverConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_inactive_interval_secs: DEFAULT_MAX_INACTIVE_INTERVAL_SECONDS,
            flush_mode: FlushMode::default(),
            save_mode: SaveMode::default(),
            resolver: ResolverConfig::default(),
        }
    }
}

/// Session id transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolverConfig {
    Cookie(CookieConfig),
    Header(HeaderConfig),
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig::Cookie(CookieConfig::default())
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie name (default: SESSION)
    pub name: String,
    /// Cookie path (default: /)
    pub path: Option<String>,
    /// Cookie domain
    pub domain: Option<String>,
    /// Mark the cookie HttpOnly (default: true)
    pub http_only: bool,
    /// Force the Secure flag on or off; unset follows the request scheme
    pub secure: Option<bool>,
    /// SameSite attribute (default: Lax)
    pub same_site: Option<SameSite>,
    /// Cookie Max-Age in seconds; unset means a browser-session cookie
    pub max_age_secs: Option<i64>,
    /// Base64-encode the cookie value (default: true)
    pub base64_encode: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "SESSION".to_string(),
            path: Some("/".to_string()),
            domain: None,
            http_only: true,
            secure: None,
            same_site: Some(SameSite::Lax),
            max_age_secs: None,
            base64_encode: true,
        }
    }
}

/// Session header configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Header name (default: X-Auth-Token)
    pub name: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            name: "X-Auth-Token".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout in seconds
    pub fn with_max_inactive_interval(mut self, secs: i64) -> Self {
        self.max_inactive_interval_secs = secs;
        self
    }

    /// Set the flush mode
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    /// Set the save mode
    pub fn with_save_mode(mut self, save_mode: SaveMode) -> Self {
        self.save_mode = save_mode;
        self
    }

    /// Set the id transport
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    /// Idle timeout as a duration. Out-of-range values are clamped.
    pub fn max_inactive_interval(&self) -> TimeDelta {
        let secs = self
            .max_inactive_interval_secs
            .clamp(-MAX_DURATION_SECS, MAX_DURATION_SECS);
        TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::zero())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_inactive_interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "max_inactive_interval_secs".into(),
                message: "must be non-zero (negative never expires)".into(),
            });
        }
        let interval_range = -MAX_DURATION_SECS..=MAX_DURATION_SECS;
        if !interval_range.contains(&self.max_inactive_interval_secs) {
            return Err(ConfigValidationError::InvalidValue {
                field: "max_inactive_interval_secs".into(),
                message: format!("must be within {} seconds", MAX_DURATION_SECS),
            });
        }

        match &self.resolver {
            ResolverConfig::Cookie(cookie) => {
                if cookie.name.is_empty() || !cookie.name.chars().all(is_cookie_name_char) {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "resolver.name".into(),
                        message: format!("'{}' is not a valid cookie name", cookie.name),
                    });
                }
                let max_age_in_range = cookie
                    .max_age_secs
                    .is_none_or(|age| (0..=MAX_DURATION_SECS).contains(&age));
                if !max_age_in_range {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "resolver.max_age_secs".into(),
                        message: format!("must be between 0 and {}", MAX_DURATION_SECS),
                    });
                }
            }
            ResolverConfig::Header(header) => {
                if HeaderName::from_bytes(header.name.as_bytes()).is_err() {
                    return Err(ConfigValidationError::InvalidValue {
                        field: "resolver.name".into(),
                        message: format!("'{}' is not a valid header name", header.name),
                    });
                }
            }
        }

        Ok(())
    }

    /// Build the configured id resolver
    pub fn build_resolver(&self) -> Result<Arc<dyn SessionIdResolver>, ConfigValidationError> {
        self.validate()?;
        let resolver: Arc<dyn SessionIdResolver> = match &self.resolver {
            ResolverConfig::Cookie(cookie) => {
                Arc::new(CookieSessionIdResolver::new(cookie.clone()))
            }
            ResolverConfig::Header(header) => {
                let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
                    ConfigValidationError::InvalidValue {
                        field: "resolver.name".into(),
                        message: format!("'{}' is not a valid header name", header.name),
                    }
                })?;
                Arc::new(HeaderSessionIdResolver::new(name))
            }
        };
        Ok(resolver)
    }
}

// RFC 6265 cookie-name token characters
fn is_cookie_name_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
