//! Dispatcher decorator that persists the session before an include.

use async_trait::async_trait;
use std::sync::Arc;

use super::SessionRequest;
use crate::error::Result;
use crate::web::{HttpResponse, RequestDispatcher, ServerRequest};

/// An included target may commit the response, so the session is committed first.
/// Forwards are passed through untouched.
pub struct SessionCommittingDispatcher {
    session: Arc<SessionRequest>,
    delegate: Arc<dyn RequestDispatcher>,
}

impl SessionCommittingDispatcher {
    pub fn new(session: Arc<SessionRequest>, delegate: Arc<dyn RequestDispatcher>) -> Self {
        Self { session, delegate }
    }
}

#[async_trait]
impl RequestDispatcher for SessionCommittingDispatcher {
    async fn forward(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        self.delegate.forward(request, response).await
    }

    async fn include(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        self.session.commit_session(response)?;
        self.delegate.include(request, response).await
    }
}
