//! Response decorator that persists the session right before commit.

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::sync::Arc;
use tracing::trace;

use super::SessionRequest;
use crate::error::Result;
use crate::web::HttpResponse;

/// Wraps the downstream response so the session is committed at the last moment
/// headers can still be written: the first write, flush, status change, error or
/// redirect.
pub struct SessionCommittingResponse<'a> {
    inner: &'a mut dyn HttpResponse,
    session: Arc<SessionRequest>,
    hook_fired: bool,
}

impl<'a> SessionCommittingResponse<'a> {
    pub fn new(inner: &'a mut dyn HttpResponse, session: Arc<SessionRequest>) -> Self {
        Self {
            inner,
            session,
            hook_fired: false,
        }
    }

    /// Whether the pre-commit hook has run.
    pub fn is_hook_fired(&self) -> bool {
        self.hook_fired
    }

    fn on_response_committed(&mut self) -> Result<()> {
        if self.hook_fired {
            return Ok(());
        }
        self.hook_fired = true;
        trace!("Response committing, persisting session");
        self.session.commit_session(&mut *self.inner)?;
        self.session.mark_response_committed()
    }
}

impl HttpResponse for SessionCommittingResponse<'_> {
    fn status(&self) -> StatusCode {
        self.inner.status()
    }

    fn set_status(&mut self, status: StatusCode) -> Result<()> {
        self.on_response_committed()?;
        self.inner.set_status(status)
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.append_header(name, value);
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.set_header(name, value);
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.on_response_committed()?;
        self.inner.write(chunk)
    }

    fn flush(&mut self) -> Result<()> {
        self.on_response_committed()?;
        self.inner.flush()
    }

    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<()> {
        self.on_response_committed()?;
        self.inner.send_error(status, message)
    }

    fn send_redirect(&mut self, location: &str) -> Result<()> {
        self.on_response_committed()?;
        self.inner.send_redirect(location)
    }

    fn is_committed(&self) -> bool {
        self.inner.is_committed()
    }
}
