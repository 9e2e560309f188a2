//! HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

/// Errors surfaced to HTTP clients
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No active session")]
    NoSession,

    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Session middleware is not installed on this route")]
    SessionUnavailable,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Session(#[from] sessgate_core::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::NoSession => (StatusCode::UNAUTHORIZED, "NO_SESSION"),
            AppError::NotLoggedIn => (StatusCode::UNAUTHORIZED, "NOT_LOGGED_IN"),
            AppError::SessionUnavailable => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SESSION_UNAVAILABLE")
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Session(err) if err.is_store_failure() => {
                (StatusCode::SERVICE_UNAVAILABLE, "SESSION_STORE_ERROR")
            }
            AppError::Session(sessgate_core::Error::UnsupportedExchange(_)) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_EXCHANGE")
            }
            AppError::Session(err) if err.is_protocol_misuse() => {
                (StatusCode::INTERNAL_SERVER_ERROR, "SESSION_PROTOCOL_ERROR")
            }
            AppError::Session(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SESSION_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self, code, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
