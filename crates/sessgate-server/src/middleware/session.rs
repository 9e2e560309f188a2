//! Session middleware for axum.
//!
//! Runs the downstream router as the endpoint of the session filter. The router's
//! response is replayed onto a [`BufferedResponse`] through the filter's response
//! view, so the session is committed before the status line is set.
//!
//! Router bodies are buffered in full, up to `max_response_body_bytes`. Streaming
//! routes belong outside this middleware.

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};
use sessgate_core::filter::SessionRequest;
use sessgate_core::web::{
    BufferedResponse, Filter, FilterChain, HttpResponse, RequestHead, ServerRequest,
};
use sessgate_core::{Error, Result, SessionHandle};
use std::sync::{Arc, Mutex};
use tracing::error;

use crate::error::AppError;
use crate::state::AppState;

/// Session view for the current request, available to handlers as an extractor.
#[derive(Clone)]
pub struct CurrentSession(pub Arc<SessionRequest>);

impl CurrentSession {
    /// The bound session, creating one when `create` is set.
    pub fn get(&self, create: bool) -> Result<Option<SessionHandle>> {
        self.0.get_session(create)
    }

    /// The bound session, creating one if needed.
    pub fn get_or_create(&self) -> std::result::Result<SessionHandle, AppError> {
        self.0.get_session(true)?.ok_or(AppError::NoSession)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or(AppError::SessionUnavailable)
    }
}

/// The rest of the axum stack, run once as the filter chain's endpoint.
struct RouterEndpoint {
    pending: Mutex<Option<(Next, Request<Body>)>>,
    body_limit: usize,
}

#[async_trait]
impl FilterChain for RouterEndpoint {
    async fn do_filter(
        &self,
        request: &mut ServerRequest,
        response: &mut dyn HttpResponse,
    ) -> Result<()> {
        let Some((next, mut inner)) = self.pending.lock().map_err(|_| Error::LockPoisoned)?.take()
        else {
            return Ok(());
        };

        if let Some(session) = request.session_request() {
            inner
                .extensions_mut()
                .insert(CurrentSession(Arc::clone(session)));
        }

        let (parts, body) = next.run(inner).await.into_parts();
        let bytes = match axum::body::to_bytes(body, self.body_limit).await {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(error = %err, limit = self.body_limit, "Failed to buffer router response");
                return response.send_error(StatusCode::INTERNAL_SERVER_ERROR, None);
            }
        };

        response.set_status(parts.status)?;
        for (name, value) in &parts.headers {
            response.append_header(name.clone(), value.clone());
        }
        if !bytes.is_empty() {
            response.write(&bytes)?;
        }
        response.flush()
    }
}

/// Session middleware for axum
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let mut server_request = ServerRequest::new(RequestHead::from(&parts));
    let endpoint = RouterEndpoint {
        pending: Mutex::new(Some((next, Request::from_parts(parts, body)))),
        body_limit: state.config.max_response_body_bytes,
    };

    let mut buffered = BufferedResponse::new();
    state
        .sessions
        .do_filter(&mut server_request, &mut buffered, &endpoint)
        .await?;

    let (status, headers, body) = buffered.into_parts();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
