//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use nipo_core::{Identity, Profile, SessionManager};
use std::sync::Arc;
use tracing::warn;

use crate::web::{rest::HttpError, state::AppState};

/// The authenticated session attached to a request by `require_auth`.
#[derive(Clone)]
pub struct CurrentSession {
    pub identity: Identity,
    /// The profile known when the request arrived, if any.
    pub profile: Option<Profile>,
    pub manager: Arc<SessionManager>,
}

/// Reads the `session` cookie from the request headers.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix("session="))
        .filter(|token| !token.is_empty())
}

/// Middleware that resolves the session cookie to a live `SessionManager`.
///
/// If valid, inserts a `CurrentSession` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, HttpError> {
    let token = session_cookie(req.headers())
        .ok_or_else(HttpError::unauthorized)?
        .to_string();

    let (manager, session) = state
        .sessions
        .resolve(&token)
        .await
        .map_err(|e| {
            warn!("Failed to restore auth session: {}", e);
            HttpError::from(e)
        })?
        .ok_or_else(HttpError::unauthorized)?;

    req.extensions_mut().insert(CurrentSession {
        identity: session.identity,
        profile: session.profile,
        manager,
    });

    Ok(next.run(req).await)
}
