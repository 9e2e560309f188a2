//! The session filter: binds a session view to each request and commits it.

use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tracing::{debug, warn};

use super::once_per_request::{OncePerRequest, OncePerRequestFilter};
use super::response::SessionCommittingResponse;
use super::session_request::SessionRequest;
use crate::config::{FlushMode, SessionConfig};
use crate::error::{Error, Result};
use crate::resolver::SessionIdResolver;
use crate::store::SessionStore;
use crate::web::{FilterChain, HttpResponse, ServerRequest};

/// Request attribute under which the active store is published.
pub const SESSION_STORE_ATTR: &str = "sessgate.SessionStore";

/// Coordinates session lookup, creation and persistence around a filter chain.
///
/// Wrap it with [`into_filter`](Self::into_filter) before adding it to a
/// pipeline so re-entrant dispatches do not run it twice.
pub struct SessionFilter {
    store: Arc<dyn SessionStore>,
    resolver: Arc<dyn SessionIdResolver>,
    flush_mode: FlushMode,
}

impl SessionFilter {
    pub fn builder() -> SessionFilterBuilder {
        SessionFilterBuilder::default()
    }

    /// Build a filter from validated configuration and an existing store.
    pub fn from_config(store: Arc<dyn SessionStore>, config: &SessionConfig) -> Result<Self> {
        config.validate()?;
        Self::builder()
            .store(store)
            .resolver(config.build_resolver()?)
            .flush_mode(config.flush_mode)
            .build()
    }

    pub fn into_filter(self) -> OncePerRequestFilter<Self> {
        OncePerRequestFilter::new(self)
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<dyn SessionIdResolver> {
        &self.resolver
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }
}

#[async_trait]
impl OncePerRequest for SessionFilter {
    async fn filter_internal(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
        chain: &dyn FilterChain,
    ) -> Result<()> {
        request.set_attribute(SESSION_STORE_ATTR, Arc::clone(&self.store));

        let (session, owned) = match request.session_request() {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                let session = Arc::new(SessionRequest::new(
                    request.head().clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.resolver),
                    self.flush_mode,
                ));
                request.bind_session_request(Some(Arc::clone(&session)));
                (session, true)
            }
        };
        let mut request = Binding { request, owned };
        session.enter()?;

        let chain_result = {
            let mut wrapped = SessionCommittingResponse::new(response, Arc::clone(&session));
            chain.do_filter(&mut request, &mut wrapped).await
        };
        let commit_result = session.commit_session(response);
        drop(request);

        match (chain_result, commit_result) {
            (Err(err), Err(commit_err)) => {
                warn!(error = %commit_err, "Failed to commit session after chain error");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(commit_err)) => Err(commit_err),
            (Ok(()), Ok(())) => {
                debug!("Session committed");
                Ok(())
            }
        }
    }

    async fn filter_nested_error_dispatch(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
        chain: &dyn FilterChain,
    ) -> Result<()> {
        self.filter_internal(request, response, chain).await
    }
}

/// Unbinds a view this filter bound when dropped, including during unwinding.
struct Binding<'r> {
    request: &'r mut ServerRequest,
    owned: bool,
}

impl Deref for Binding<'_> {
    type Target = ServerRequest;

    fn deref(&self) -> &ServerRequest {
        self.request
    }
}

impl DerefMut for Binding<'_> {
    fn deref_mut(&mut self) -> &mut ServerRequest {
        self.request
    }
}

impl Drop for Binding<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.request.bind_session_request(None);
        }
    }
}

/// Builder for [`SessionFilter`]. Store and resolver are required.
#[derive(Default)]
pub struct SessionFilterBuilder {
    store: Option<Arc<dyn SessionStore>>,
    resolver: Option<Arc<dyn SessionIdResolver>>,
    flush_mode: FlushMode,
}

impl SessionFilterBuilder {
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn SessionIdResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn build(self) -> Result<SessionFilter> {
        Ok(SessionFilter {
            store: self.store.ok_or(Error::MissingCollaborator("store"))?,
            resolver: self.resolver.ok_or(Error::MissingCollaborator("resolver"))?,
            flush_mode: self.flush_mode,
        })
    }
}
