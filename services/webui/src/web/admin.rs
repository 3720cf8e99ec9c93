//! services/webui/src/web/admin.rs
//!
//! Administration endpoints under `/admin`. Every route here sits behind
//! `require_auth` and `require_admin`; the handlers add the super-admin checks.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension,
};
use chat_core::domain::{BatchOperation, NewUser, SessionUser, SystemStats, User, UserRole};
use chat_core::ports::PortError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::web::auth::{hash_password, validate_new_password};
use crate::web::extract::JsonBody;
use crate::web::response::{fail, ok, port_failure, respond, ApiFailure, ApiResult, Empty};
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            role: u.role.to_string(),
            created_at: u.created_at,
            last_login: u.last_login,
            is_active: u.is_active,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserView>,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    /// One of `user`, `admin`, `super_admin`. Defaults to `user`.
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CreateUserResponse {
    pub user: UserView,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    pub role: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub is_active: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub new_password: String,
}

#[derive(Serialize, ToSchema)]
pub struct UserDetailsResponse {
    pub user: UserView,
    pub conversation_count: i64,
    pub message_count: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct BatchRequest {
    /// One of `delete`, `activate`, `deactivate`.
    #[schema(value_type = String)]
    pub operation: BatchOperation,
    pub user_ids: Vec<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct BatchResponse {
    pub affected_count: u64,
}

#[derive(Serialize, ToSchema)]
pub struct UserStatsView {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub admin: i64,
    pub super_admin: i64,
    /// Users who logged in during the last seven days.
    pub recent_active: i64,
}

#[derive(Serialize, ToSchema)]
pub struct CountView {
    pub total: i64,
}

#[derive(Serialize, ToSchema)]
pub struct StatsResponse {
    pub users: UserStatsView,
    pub conversations: CountView,
    pub messages: CountView,
}

impl From<SystemStats> for StatsResponse {
    fn from(s: SystemStats) -> Self {
        Self {
            users: UserStatsView {
                total: s.users.total,
                active: s.users.active,
                inactive: s.users.inactive,
                admin: s.users.admin,
                super_admin: s.users.super_admin,
                recent_active: s.users.recent_active,
            },
            conversations: CountView {
                total: s.conversations.total,
            },
            messages: CountView {
                total: s.messages.total,
            },
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConfigFileList {
    pub files: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ConfigFileContent {
    pub filename: String,
    pub content: String,
}

#[derive(Deserialize, ToSchema)]
pub struct ConfigFileUpdate {
    pub content: String,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn require_super_admin(me: &SessionUser) -> ApiResult<()> {
    if me.role.is_super_admin() {
        Ok(())
    } else {
        warn!(user_id = me.user_id, "Super admin privileges required");
        Err(fail(StatusCode::FORBIDDEN, "Super admin privileges required"))
    }
}

fn not_self(me: &SessionUser, user_id: i64, action: &str) -> ApiResult<()> {
    if me.user_id == user_id {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            format!("You cannot {} your own account", action),
        ));
    }
    Ok(())
}

/// Accounts with admin rights may only be managed by a super admin.
async fn require_rank_over(state: &AppState, me: &SessionUser, user_id: i64) -> ApiResult<()> {
    let target = state
        .db
        .get_user_by_id(user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to load user"))?;
    if target.role.is_admin() {
        require_super_admin(me)?;
    }
    Ok(())
}

fn parse_role(role: &str) -> ApiResult<UserRole> {
    role.trim()
        .parse::<UserRole>()
        .map_err(|e| fail(StatusCode::BAD_REQUEST, format!("Invalid role: {}", e)))
}

/// The kinds of file the config editor will read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFileKind {
    Toml,
    Json,
}

/// Rejects anything that is not a bare `.toml`/`.json` file name.
pub fn validate_config_filename(filename: &str) -> Result<ConfigFileKind, &'static str> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename.contains("..")
        || filename.starts_with('.')
    {
        return Err("Invalid file name");
    }
    if filename.ends_with(".toml") {
        Ok(ConfigFileKind::Toml)
    } else if filename.ends_with(".json") {
        Ok(ConfigFileKind::Json)
    } else {
        Err("Only .toml and .json files can be edited")
    }
}

/// Checks the new content parses, returning the text to write.
pub fn prepare_config_content(kind: ConfigFileKind, content: &str) -> Result<String, String> {
    match kind {
        ConfigFileKind::Toml => toml::from_str::<toml::Value>(content)
            .map(|_| content.to_string())
            .map_err(|e| format!("Invalid TOML: {}", e)),
        ConfigFileKind::Json => serde_json::from_str::<serde_json::Value>(content)
            .and_then(|value| serde_json::to_string_pretty(&value))
            .map_err(|e| format!("Invalid JSON: {}", e)),
    }
}

fn config_path(state: &AppState, filename: &str) -> ApiResult<(PathBuf, ConfigFileKind)> {
    let kind = validate_config_filename(filename).map_err(|e| fail(StatusCode::BAD_REQUEST, e))?;
    Ok((state.config.admin_config_dir.join(filename), kind))
}

fn io_failure(err: std::io::Error, context: &str) -> ApiFailure {
    if err.kind() == std::io::ErrorKind::NotFound {
        return fail(StatusCode::NOT_FOUND, "Config file not found");
    }
    port_failure(PortError::Unexpected(err.to_string()), context)
}

//=========================================================================================
// User Management Handlers
//=========================================================================================

/// GET /admin/users - All accounts, newest first
#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "All users", body = UserListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn list_users_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let users = state
        .db
        .list_users()
        .await
        .map_err(|e| port_failure(e, "Failed to list users"))?;
    Ok(ok(
        "OK",
        UserListResponse {
            users: users.into_iter().map(Into::into).collect(),
        },
    ))
}

/// POST /admin/users - Create an account with a chosen role
#[utoipa::path(
    post,
    path = "/admin/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = CreateUserResponse),
        (status = 400, description = "Missing field, short password or invalid role"),
        (status = 403, description = "Only super admins may create admins"),
        (status = 409, description = "Username or email already exists")
    )
)]
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    JsonBody(req): JsonBody<CreateUserRequest>,
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
    let role = match req.role.as_deref() {
        Some(role) => parse_role(role)?,
        None => UserRole::User,
    };
    if role.is_admin() {
        require_super_admin(&me)?;
    }

    let user = state
        .db
        .create_user(NewUser {
            username: username.to_string(),
            email: email.to_string(),
            hashed_password: hash_password(&req.password)?,
            role,
        })
        .await
        .map_err(|e| match e {
            PortError::Conflict(_) => {
                fail(StatusCode::CONFLICT, "Username or email already exists")
            }
            other => port_failure(other, "Failed to create user"),
        })?;

    info!(admin_id = me.user_id, user_id = user.id, role = %role, "Admin created user");
    Ok((
        StatusCode::CREATED,
        respond(
            StatusCode::CREATED,
            "User created",
            CreateUserResponse { user: user.into() },
        ),
    ))
}

/// PUT /admin/users/{id}/role - Change an account's role
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated"),
        (status = 400, description = "Invalid role"),
        (status = 403, description = "Super admin privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_role_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(user_id): Path<i64>,
    JsonBody(req): JsonBody<UpdateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    require_super_admin(&me)?;
    let role = parse_role(&req.role)?;

    state
        .db
        .update_user_role(user_id, role)
        .await
        .map_err(|e| port_failure(e, "Failed to update role"))?;

    info!(admin_id = me.user_id, user_id, role = %role, "Role updated");
    Ok(ok("Role updated", Empty::default()))
}

/// PUT /admin/users/{id}/status - Activate or deactivate an account
#[utoipa::path(
    put,
    path = "/admin/users/{id}/status",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated"),
        (status = 400, description = "Cannot change your own status"),
        (status = 403, description = "Only super admins may change an admin's status"),
        (status = 404, description = "User not found")
    )
)]
pub async fn update_status_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(user_id): Path<i64>,
    JsonBody(req): JsonBody<UpdateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    not_self(&me, user_id, "change the status of")?;
    require_rank_over(&state, &me, user_id).await?;

    state
        .db
        .set_user_active(user_id, req.is_active)
        .await
        .map_err(|e| port_failure(e, "Failed to update status"))?;

    info!(admin_id = me.user_id, user_id, is_active = req.is_active, "Status updated");
    Ok(ok("Status updated", Empty::default()))
}

/// DELETE /admin/users/{id} - Delete an account and everything it owns
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "Cannot delete your own account"),
        (status = 403, description = "Super admin privileges required"),
        (status = 404, description = "User not found")
    )
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    require_super_admin(&me)?;
    not_self(&me, user_id, "delete")?;

    state
        .db
        .delete_user(user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to delete user"))?;

    info!(admin_id = me.user_id, user_id, "User deleted");
    Ok(ok("User deleted", Empty::default()))
}

/// PUT /admin/users/{id}/reset-password - Set a new password for an account
#[utoipa::path(
    put,
    path = "/admin/users/{id}/reset-password",
    params(("id" = i64, Path, description = "User ID")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password reset"),
        (status = 400, description = "Empty password"),
        (status = 403, description = "Only super admins may reset an admin's password"),
        (status = 404, description = "User not found")
    )
)]
pub async fn reset_password_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(user_id): Path<i64>,
    JsonBody(req): JsonBody<ResetPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    require_rank_over(&state, &me, user_id).await?;
    if req.new_password.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "New password is required"));
    }
    let hash = hash_password(&req.new_password)?;

    state
        .db
        .update_user_password(user_id, &hash)
        .await
        .map_err(|e| port_failure(e, "Failed to reset password"))?;

    info!(admin_id = me.user_id, user_id, "Password reset");
    Ok(ok("Password reset", Empty::default()))
}

/// GET /admin/users/{id}/details - An account with its activity counters
#[utoipa::path(
    get,
    path = "/admin/users/{id}/details",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User details", body = UserDetailsResponse),
        (status = 404, description = "User not found")
    )
)]
pub async fn user_details_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let details = state
        .db
        .get_user_details(user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to load user details"))?;

    Ok(ok(
        "OK",
        UserDetailsResponse {
            user: details.user.into(),
            conversation_count: details.conversation_count,
            message_count: details.message_count,
        },
    ))
}

/// POST /admin/users/batch - Delete, activate or deactivate several accounts
#[utoipa::path(
    post,
    path = "/admin/users/batch",
    request_body = BatchRequest,
    responses(
        (status = 200, description = "Operation applied", body = BatchResponse),
        (status = 400, description = "Empty list or list containing yourself"),
        (status = 403, description = "Super admin privileges required to delete or to touch admins")
    )
)]
pub async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    JsonBody(req): JsonBody<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.user_ids.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "No users selected"));
    }
    if req.user_ids.contains(&me.user_id) {
        return Err(fail(
            StatusCode::BAD_REQUEST,
            "The selection cannot include your own account",
        ));
    }

    let affected_count = match req.operation {
        BatchOperation::Delete => {
            require_super_admin(&me)?;
            let mut deleted = 0;
            for &user_id in &req.user_ids {
                match state.db.delete_user(user_id).await {
                    Ok(()) => deleted += 1,
                    Err(PortError::NotFound(_)) => {}
                    Err(e) => return Err(port_failure(e, "Failed to delete users")),
                }
            }
            deleted
        }
        BatchOperation::Activate | BatchOperation::Deactivate => {
            for &user_id in &req.user_ids {
                match require_rank_over(&state, &me, user_id).await {
                    Ok(()) => {}
                    Err((StatusCode::NOT_FOUND, _)) => {}
                    Err(failure) => return Err(failure),
                }
            }
            let is_active = req.operation == BatchOperation::Activate;
            state
                .db
                .set_users_active(&req.user_ids, is_active)
                .await
                .map_err(|e| port_failure(e, "Failed to update users"))?
        }
    };

    info!(admin_id = me.user_id, operation = ?req.operation, affected_count, "Batch operation applied");
    Ok(ok("Batch operation applied", BatchResponse { affected_count }))
}

/// GET /admin/stats - Instance-wide user, conversation and message counters
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses(
        (status = 200, description = "System statistics", body = StatsResponse),
        (status = 403, description = "Admin privileges required")
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let stats = state
        .db
        .system_stats()
        .await
        .map_err(|e| port_failure(e, "Failed to load statistics"))?;
    Ok(ok("OK", StatsResponse::from(stats)))
}

//=========================================================================================
// Config File Handlers
//=========================================================================================

/// GET /admin/config - Editable config files in the config directory
#[utoipa::path(
    get,
    path = "/admin/config",
    responses(
        (status = 200, description = "Sorted file names", body = ConfigFileList),
        (status = 403, description = "Super admin privileges required")
    )
)]
pub async fn list_config_files_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
) -> ApiResult<impl IntoResponse> {
    require_super_admin(&me)?;

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(&state.config.admin_config_dir)
        .await
        .map_err(|e| io_failure(e, "Failed to list config files"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| io_failure(e, "Failed to list config files"))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if let Some(name) = entry.file_name().to_str() {
            if is_file && validate_config_filename(name).is_ok() {
                files.push(name.to_string());
            }
        }
    }
    files.sort();

    Ok(ok("OK", ConfigFileList { files }))
}

/// GET /admin/config/{filename} - Read one config file
#[utoipa::path(
    get,
    path = "/admin/config/{filename}",
    params(("filename" = String, Path, description = "Bare .toml or .json file name")),
    responses(
        (status = 200, description = "File content", body = ConfigFileContent),
        (status = 400, description = "Invalid file name"),
        (status = 403, description = "Super admin privileges required"),
        (status = 404, description = "Config file not found")
    )
)]
pub async fn get_config_file_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(filename): Path<String>,
) -> ApiResult<impl IntoResponse> {
    require_super_admin(&me)?;
    let (path, _) = config_path(&state, &filename)?;

    let content = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| io_failure(e, "Failed to read config file"))?;

    Ok(ok("OK", ConfigFileContent { filename, content }))
}

/// PUT /admin/config/{filename} - Replace one config file after validating it
#[utoipa::path(
    put,
    path = "/admin/config/{filename}",
    params(("filename" = String, Path, description = "Bare .toml or .json file name")),
    request_body = ConfigFileUpdate,
    responses(
        (status = 200, description = "File saved"),
        (status = 400, description = "Invalid file name or content"),
        (status = 403, description = "Super admin privileges required")
    )
)]
pub async fn put_config_file_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(filename): Path<String>,
    JsonBody(req): JsonBody<ConfigFileUpdate>,
) -> ApiResult<impl IntoResponse> {
    require_super_admin(&me)?;
    let (path, kind) = config_path(&state, &filename)?;
    let content =
        prepare_config_content(kind, &req.content).map_err(|e| fail(StatusCode::BAD_REQUEST, e))?;

    tokio::fs::write(&path, content)
        .await
        .map_err(|e| io_failure(e, "Failed to write config file"))?;

    info!(admin_id = me.user_id, file = %filename, "Config file updated");
    Ok(ok("Config file saved", Empty::default()))
}
