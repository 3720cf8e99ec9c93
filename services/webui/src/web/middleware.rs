//! services/webui/src/web/middleware.rs
//!
//! Authentication and authorization middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use chat_core::domain::SessionUser;
use chat_core::ports::PortError;
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::auth::session_id_from_headers;
use crate::web::response::{fail, ApiResult};
use crate::web::state::AppState;

/// Middleware that validates the auth session cookie and resolves the caller.
///
/// If valid, inserts the `SessionUser` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> ApiResult<Response> {
    let unauthorized = || fail(StatusCode::UNAUTHORIZED, "Not authenticated");

    // 1. Parse session ID from cookie
    let auth_session_id = session_id_from_headers(req.headers()).ok_or_else(unauthorized)?;

    // 2. Validate auth session in database
    let session_user = match state.db.validate_auth_session(auth_session_id).await {
        Ok(user) => user,
        Err(PortError::NotFound(_)) | Err(PortError::Unauthorized) => return Err(unauthorized()),
        Err(e) => {
            error!("Failed to validate auth session: {:?}", e);
            return Err(unauthorized());
        }
    };

    // 3. Insert the caller into request extensions
    req.extensions_mut().insert(session_user);

    // 4. Continue to the handler
    Ok(next.run(req).await)
}

/// Middleware that only lets admins and super admins through. Must run after `require_auth`.
pub async fn require_admin(req: Request, next: Next) -> ApiResult<Response> {
    let Some(user) = req.extensions().get::<SessionUser>() else {
        return Err(fail(StatusCode::UNAUTHORIZED, "Not authenticated"));
    };
    if !user.role.is_admin() {
        warn!(user_id = user.user_id, "Non-admin tried to reach an admin endpoint");
        return Err(fail(StatusCode::FORBIDDEN, "Admin privileges required"));
    }
    Ok(next.run(req).await)
}
