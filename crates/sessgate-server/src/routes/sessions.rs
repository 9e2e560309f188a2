//! Session demo routes.

use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::AppError;
use crate::middleware::CurrentSession;
use crate::state::AppState;

const USER_ATTR: &str = "user";
const VISITS_ATTR: &str = "visits";

#[derive(Serialize)]
pub struct VisitResponse {
    pub session_id: String,
    pub visits: u64,
    pub is_new: bool,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub session_id: String,
    pub username: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/visits", get(visit))
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
}

/// Count requests made with this session
async fn visit(session: CurrentSession) -> Result<Json<VisitResponse>, AppError> {
    let handle = session.get_or_create()?;
    let visits = handle.attribute_as::<u64>(VISITS_ATTR)?.unwrap_or(0) + 1;
    handle.set_attribute(VISITS_ATTR, visits)?;

    Ok(Json(VisitResponse {
        session_id: handle.id()?,
        visits,
        is_new: handle.is_new()?,
    }))
}

/// Log in, rotating the session id to prevent fixation
async fn login(
    session: CurrentSession,
    Json(req): Json<LoginRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("username is required".to_string()));
    }

    let handle = session.get_or_create()?;
    let session_id = handle.change_session_id()?;
    handle.set_attribute(USER_ATTR, username)?;
    info!(user = %username, "User logged in");

    Ok(Json(UserResponse {
        session_id,
        username: username.to_string(),
    }))
}

/// The logged-in user, if any
async fn me(session: CurrentSession) -> Result<Json<UserResponse>, AppError> {
    let handle = session.get(false)?.ok_or(AppError::NoSession)?;
    let username = handle
        .attribute_as::<String>(USER_ATTR)?
        .ok_or(AppError::NotLoggedIn)?;

    Ok(Json(UserResponse {
        session_id: handle.id()?,
        username,
    }))
}

/// Invalidate the session and tell the client to forget its id
async fn logout(session: CurrentSession) -> Result<StatusCode, AppError> {
    if let Some(handle) = session.get(false)? {
        handle.invalidate()?;
    }
    Ok(StatusCode::NO_CONTENT)
}
