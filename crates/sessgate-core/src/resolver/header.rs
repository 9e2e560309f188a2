//! Header-based session id transport.

use http::{HeaderName, HeaderValue};

use super::SessionIdResolver;
use crate::error::Result;
use crate::web::{HttpResponse, RequestHead};

/// Carries the session id in a single request/response header, for API clients
/// that do not keep cookies.
#[derive(Debug, Clone)]
pub struct HeaderSessionIdResolver {
    header_name: HeaderName,
}

impl HeaderSessionIdResolver {
    pub fn new(header_name: HeaderName) -> Self {
        Self { header_name }
    }

    /// `X-Auth-Token`
    pub fn x_auth_token() -> Self {
        Self::new(HeaderName::from_static("x-auth-token"))
    }

    /// `Authentication-Info`
    pub fn authentication_info() -> Self {
        Self::new(HeaderName::from_static("authentication-info"))
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header_name
    }
}

impl SessionIdResolver for HeaderSessionIdResolver {
    fn resolve_session_ids(&self, request: &RequestHead) -> Result<Vec<String>> {
        Ok(request
            .headers
            .get(&self.header_name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| vec![value.to_string()])
            .unwrap_or_default())
    }

    fn set_session_id(
        &self,
        _request: &RequestHead,
        response: &mut dyn HttpResponse,
        session_id: &str,
    ) -> Result<()> {
        response.set_header(self.header_name.clone(), HeaderValue::from_str(session_id)?);
        Ok(())
    }

    fn expire_session(
        &self,
        _request: &RequestHead,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        response.set_header(self.header_name.clone(), HeaderValue::from_static(""));
        Ok(())
    }
}
