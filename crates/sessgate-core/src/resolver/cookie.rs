//! Cookie-based session id transport.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Utc};
use http::HeaderValue;
use http::header::{COOKIE, SET_COOKIE};
use tracing::debug;

use super::SessionIdResolver;
use crate::config::{ConfigValidationError, CookieConfig};
use crate::error::Result;
use crate::web::{HttpResponse, RequestHead};

const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Carries the session id in a cookie (named `SESSION` by default).
#[derive(Debug, Clone, Default)]
pub struct CookieSessionIdResolver {
    config: CookieConfig,
}

impl CookieSessionIdResolver {
    pub fn new(config: CookieConfig) -> Self {
        Self { config }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.name
    }

    fn encode(&self, value: &str) -> String {
        if self.config.base64_encode {
            STANDARD.encode(value)
        } else {
            value.to_string()
        }
    }

    fn decode(&self, value: &str) -> Option<String> {
        if !self.config.base64_encode {
            return Some(value.to_string());
        }
        let bytes = STANDARD.decode(value).ok()?;
        String::from_utf8(bytes).ok()
    }

    /// Build a `Set-Cookie` value. `max_age` overrides the configured one.
    fn format_set_cookie(
        &self,
        request: &RequestHead,
        value: &str,
        max_age: Option<i64>,
    ) -> Result<String> {
        let mut cookie = format!("{}={}", self.config.name, value);

        if let Some(age) = max_age.or(self.config.max_age_secs) {
            let expires = if age == 0 {
                DateTime::<Utc>::UNIX_EPOCH
            } else {
                TimeDelta::try_seconds(age)
                    .and_then(|delta| Utc::now().checked_add_signed(delta))
                    .ok_or_else(|| ConfigValidationError::InvalidValue {
                        field: "resolver.max_age_secs".into(),
                        message: format!("{} is out of range", age),
                    })?
            };
            cookie.push_str(&format!("; Max-Age={}", age));
            cookie.push_str(&format!("; Expires={}", expires.format(EXPIRES_FORMAT)));
        }
        if let Some(domain) = &self.config.domain {
            cookie.push_str(&format!("; Domain={}", domain));
        }
        if let Some(path) = &self.config.path {
            cookie.push_str(&format!("; Path={}", path));
        }
        if self.config.secure.unwrap_or_else(|| request.is_secure()) {
            cookie.push_str("; Secure");
        }
        if self.config.http_only {
            cookie.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.config.same_site {
            cookie.push_str(&format!("; SameSite={}", same_site.as_str()));
        }

        Ok(cookie)
    }

    fn already_written(&self, response: &dyn HttpResponse, value: &str) -> bool {
        let pair = format!("{}={}", self.config.name, value);
        response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .any(|header| header == pair || header.starts_with(&format!("{};", pair)))
    }
}

impl SessionIdResolver for CookieSessionIdResolver {
    fn resolve_session_ids(&self, request: &RequestHead) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for header in request.headers.get_all(COOKIE) {
            let Ok(header) = header.to_str() else {
                continue;
            };
            for pair in header.split(';') {
                let Some((name, value)) = pair.trim().split_once('=') else {
                    continue;
                };
                if name.trim() != self.config.name {
                    continue;
                }
                let value = value.trim().trim_matches('"');
                match self.decode(value) {
                    Some(id) if !id.is_empty() => ids.push(id),
                    _ => debug!(cookie = %self.config.name, "Ignoring undecodable session cookie"),
                }
            }
        }
        Ok(ids)
    }

    fn set_session_id(
        &self,
        request: &RequestHead,
        response: &mut dyn HttpResponse,
        session_id: &str,
    ) -> Result<()> {
        let value = self.encode(session_id);
        if self.already_written(response, &value) {
            return Ok(());
        }
        let cookie = self.format_set_cookie(request, &value, None)?;
        response.append_header(SET_COOKIE, HeaderValue::from_str(&cookie)?);
        Ok(())
    }

    fn expire_session(
        &self,
        request: &RequestHead,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        let cookie = self.format_set_cookie(request, "", Some(0))?;
        response.append_header(SET_COOKIE, HeaderValue::from_str(&cookie)?);
        Ok(())
    }
}
