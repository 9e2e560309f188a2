//! Outbound response types.

use http::header::LOCATION;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use crate::error::{Error, Result};

/// A response being written by the pipeline.
///
/// Once committed the status line and headers are on the wire: header writes are
/// silently dropped and error/redirect responses can no longer be sent.
pub trait HttpResponse: Send {
    fn status(&self) -> StatusCode;

    fn set_status(&mut self, status: StatusCode) -> Result<()>;

    fn headers(&self) -> &HeaderMap;

    /// Add a header value, keeping existing ones. Ignored after commit.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue);

    /// Replace all values of a header. Ignored after commit.
    fn set_header(&mut self, name: HeaderName, value: HeaderValue);

    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<()>;

    fn send_redirect(&mut self, location: &str) -> Result<()>;

    fn is_committed(&self) -> bool;
}

/// Default size of the body buffer before the response commits on its own.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// In-memory response that commits on flush or once the body buffer fills.
#[derive(Debug)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    buffer_size: usize,
    committed: bool,
}

impl Default for BufferedResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Vec::new(),
            buffer_size,
            committed: false,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Vec<u8>) {
        (self.status, self.headers, self.body)
    }

    fn ensure_not_committed(&self) -> Result<()> {
        if self.committed {
            return Err(Error::ResponseCommitted);
        }
        Ok(())
    }
}

impl HttpResponse for BufferedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn set_status(&mut self, status: StatusCode) -> Result<()> {
        if !self.committed {
            self.status = status;
        }
        Ok(())
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.committed {
            self.headers.append(name, value);
        }
    }

    fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.committed {
            self.headers.insert(name, value);
        }
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.body.extend_from_slice(chunk);
        if self.body.len() >= self.buffer_size {
            self.committed = true;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.committed = true;
        Ok(())
    }

    fn send_error(&mut self, status: StatusCode, message: Option<&str>) -> Result<()> {
        self.ensure_not_committed()?;
        self.status = status;
        self.body.clear();
        if let Some(message) = message {
            self.body.extend_from_slice(message.as_bytes());
        }
        self.committed = true;
        Ok(())
    }

    fn send_redirect(&mut self, location: &str) -> Result<()> {
        self.ensure_not_committed()?;
        self.status = StatusCode::FOUND;
        self.headers.insert(LOCATION, HeaderValue::from_str(location)?);
        self.body.clear();
        self.committed = true;
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.committed
    }
}
