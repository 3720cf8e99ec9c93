//! services/webui/src/web/auth.rs
//!
//! Authentication endpoints for registration, login and logout, plus the
//! password and session-cookie helpers the other handlers share.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
};
use chat_core::domain::{NewUser, UserRole};
use chat_core::ports::PortError;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::Config;
use crate::web::extract::JsonBody;
use crate::web::response::{fail, ok, port_failure, respond, ApiResult, Empty};
use crate::web::state::AppState;

/// Name of the browser session cookie.
pub const SESSION_COOKIE: &str = "session";

pub const MIN_PASSWORD_LEN: usize = 6;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct CheckAuthResponse {
    pub authenticated: bool,
    pub username: String,
    pub role: String,
    pub user_id: Option<i64>,
}

//=========================================================================================
// Password and Cookie Helpers
//=========================================================================================

/// Hashes a password into an argon2 PHC string.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Failed to hash password: {:?}", e);
            fail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password")
        })
}

/// Checks a password against a stored hash. Unparseable hashes never match.
pub fn verify_password(password: &str, hashed_password: &str) -> bool {
    match PasswordHash::new(hashed_password) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Failed to parse password hash: {:?}", e);
            false
        }
    }
}

pub fn validate_new_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {} characters", MIN_PASSWORD_LEN),
        ));
    }
    Ok(())
}

/// Extracts the auth session ID from the `Cookie` header.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            c.trim()
                .strip_prefix(SESSION_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
        })
        .filter(|id| !id.is_empty())
}

fn session_cookie(config: &Config, session_id: &str) -> String {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        session_id,
        Duration::days(config.session_ttl_days).num_seconds()
    );
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn cleared_cookie(config: &Config) -> String {
    let mut cookie = format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", SESSION_COOKIE);
    if config.cookie_secure {
        cookie.push_str("; Secure");
    }
    cookie
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /register - Create a new user account
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created; body is {code, message}"),
        (status = 400, description = "Missing field or password too short"),
        (status = 409, description = "Username or email already exists"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let username = req.username.trim();
    let email = req.email.trim();
    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "Username, email and password are required",
        ));
    }
    validate_new_password(&req.password)?;

    let hashed_password = hash_password(&req.password)?;

    let user = state
        .db
        .create_user(NewUser {
            username: username.to_string(),
            email: email.to_string(),
            hashed_password,
            role: UserRole::User,
        })
        .await
        .map_err(|e| match e {
            PortError::Conflict(_) => {
                fail(StatusCode::CONFLICT, "Username or email already exists")
            }
            other => port_failure(other, "Failed to create user"),
        })?;

    info!(user_id = user.id, username = %user.username, "User registered");
    Ok((
        StatusCode::CREATED,
        respond(StatusCode::CREATED, "Registration successful", Empty::default()),
    ))
}

/// POST /login - Login with an existing account
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful; sets the session cookie"),
        (status = 401, description = "Invalid username or password"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let invalid = || fail(StatusCode::UNAUTHORIZED, "Invalid username or password");

    // 1. Get the active account by username
    let credentials = match state.db.get_credentials_by_username(req.username.trim()).await {
        Ok(credentials) => credentials,
        Err(PortError::NotFound(_)) => return Err(invalid()),
        Err(e) => return Err(port_failure(e, "Failed to look up user")),
    };

    // 2. Verify password
    if !verify_password(&req.password, &credentials.hashed_password) {
        warn!(username = %credentials.username, "Rejected login with wrong password");
        return Err(invalid());
    }

    // 3. Record the login
    state
        .db
        .record_login(credentials.user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to record login"))?;

    // 4. Create the auth session
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(state.config.session_ttl_days);
    state
        .db
        .create_auth_session(&auth_session_id, credentials.user_id, expires_at)
        .await
        .map_err(|e| port_failure(e, "Failed to create session"))?;

    // 5. Return response with cookie
    info!(user_id = credentials.user_id, "User logged in");
    Ok((
        [(header::SET_COOKIE, session_cookie(&state.config, &auth_session_id))],
        ok("Login successful", Empty::default()),
    ))
}

/// GET /logout - Invalidate the current session
#[utoipa::path(
    get,
    path = "/logout",
    responses(
        (status = 200, description = "Logged out; the session cookie is cleared")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    if let Some(auth_session_id) = session_id_from_headers(&headers) {
        state
            .db
            .delete_auth_session(auth_session_id)
            .await
            .map_err(|e| port_failure(e, "Failed to logout"))?;
    }

    Ok((
        [(header::SET_COOKIE, cleared_cookie(&state.config))],
        ok("Logged out", Empty::default()),
    ))
}

/// GET /api/check-auth - Report whether the caller is logged in
#[utoipa::path(
    get,
    path = "/api/check-auth",
    responses(
        (status = 200, description = "Authentication status", body = CheckAuthResponse)
    )
)]
pub async fn check_auth_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_user = match session_id_from_headers(&headers) {
        Some(id) => state.db.validate_auth_session(id).await.ok(),
        None => None,
    };

    let status = match session_user {
        Some(user) => CheckAuthResponse {
            authenticated: true,
            username: user.username,
            role: user.role.to_string(),
            user_id: Some(user.user_id),
        },
        None => CheckAuthResponse {
            authenticated: false,
            username: String::new(),
            role: UserRole::User.to_string(),
            user_id: None,
        },
    };
    ok("OK", status)
}
