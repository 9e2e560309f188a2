//! Inbound request types.

use http::{HeaderMap, Method, Uri};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::filter::{SESSION_STORE_ATTR, SessionRequest};
use crate::store::SessionStore;

/// Why the request is passing through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchType {
    #[default]
    Request,
    Forward,
    Include,
    Error,
    Async,
}

/// The immutable part of a request: method, target and headers.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
        }
    }

    /// Whether the request arrived over TLS, as far as the target URI tells.
    pub fn is_secure(&self) -> bool {
        self.uri.scheme_str() == Some("https")
    }
}

impl From<&http::request::Parts> for RequestHead {
    fn from(parts: &http::request::Parts) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
        }
    }
}

type Attribute = Arc<dyn Any + Send + Sync>;

/// A request travelling through a filter pipeline.
pub struct ServerRequest {
    head: RequestHead,
    dispatch_type: DispatchType,
    attributes: HashMap<String, Attribute>,
    session: Option<Arc<SessionRequest>>,
}

impl ServerRequest {
    pub fn new(head: RequestHead) -> Self {
        Self {
            head,
            dispatch_type: DispatchType::Request,
            attributes: HashMap::new(),
            session: None,
        }
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    pub fn dispatch_type(&self) -> DispatchType {
        self.dispatch_type
    }

    pub fn set_dispatch_type(&mut self, dispatch_type: DispatchType) {
        self.dispatch_type = dispatch_type;
    }

    /// Only plain HTTP(S) exchanges are supported.
    pub fn is_http(&self) -> bool {
        matches!(self.head.uri.scheme_str(), None | Some("http") | Some("https"))
    }

    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.attributes
            .get(name)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Arc::new(value));
    }

    pub fn remove_attribute(&mut self, name: &str) -> bool {
        self.attributes.remove(name).is_some()
    }

    /// The store bound by the session filter for this request.
    pub fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        self.attribute::<Arc<dyn SessionStore>>(SESSION_STORE_ATTR)
            .map(|store| Arc::clone(&*store))
    }

    /// The session view bound by the session filter, if any.
    pub fn session_request(&self) -> Option<&Arc<SessionRequest>> {
        self.session.as_ref()
    }

    pub(crate) fn bind_session_request(
        &mut self,
        session: Option<Arc<SessionRequest>>,
    ) -> Option<Arc<SessionRequest>> {
        std::mem::replace(&mut self.session, session)
    }
}
