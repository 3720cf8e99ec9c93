//! services/webui/src/web/rest.rs
//!
//! Contains the Axum handlers for the profile, conversation and chat endpoints,
//! and the master definition for the OpenAPI specification.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension,
};
use chat_core::domain::{Conversation, Message, NewMessage, SessionUser, ToolCall};
use chat_core::history::{context_window, history_before};
use chat_core::ports::PortError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::web::auth::{self, hash_password, validate_new_password, verify_password};
use crate::web::admin;
use crate::web::extract::JsonBody;
use crate::web::response::{fail, ok, port_failure, respond, ApiFailure, ApiResult, Empty};
use crate::web::state::AppState;

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

/// Stored in place of an empty assistant reply.
pub const EMPTY_REPLY_FALLBACK: &str =
    "Sorry, I could not generate a response to that. Please try again.";

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::register_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::check_auth_handler,
        get_profile_handler,
        update_profile_handler,
        list_conversations_handler,
        create_conversation_handler,
        delete_conversation_handler,
        list_messages_handler,
        chat_handler,
        guest_chat_handler,
        admin::list_users_handler,
        admin::create_user_handler,
        admin::update_role_handler,
        admin::update_status_handler,
        admin::delete_user_handler,
        admin::reset_password_handler,
        admin::user_details_handler,
        admin::batch_handler,
        admin::stats_handler,
        admin::list_config_files_handler,
        admin::get_config_file_handler,
        admin::put_config_file_handler,
    ),
    components(
        schemas(
            auth::RegisterRequest, auth::LoginRequest, auth::CheckAuthResponse,
            ProfileResponse, UpdateProfileRequest,
            CreateConversationRequest, CreateConversationResponse, ConversationView,
            ConversationListResponse, MessageView, ToolCallView, FunctionCallView,
            MessageListResponse, ChatRequest, ChatResponse, GuestChatRequest, GuestChatResponse,
            admin::UserView, admin::UserListResponse, admin::CreateUserRequest, admin::CreateUserResponse,
            admin::UpdateRoleRequest, admin::UpdateStatusRequest, admin::ResetPasswordRequest,
            admin::UserDetailsResponse, admin::BatchRequest, admin::BatchResponse,
            admin::StatsResponse, admin::UserStatsView, admin::CountView,
            admin::ConfigFileList, admin::ConfigFileContent,
            admin::ConfigFileUpdate,
        )
    ),
    tags(
        (name = "Agent Chat Web UI API", description = "Accounts, conversations and chat for the agent web UI. \
Every response is a JSON object with `code` (mirrors the HTTP status) and `message`, plus the documented fields.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub username: String,
    pub email: String,
    pub role: String,
}

/// Accepts both snake_case and the camelCase keys older clients send.
#[derive(Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub email: String,
    #[serde(alias = "currentPassword")]
    pub current_password: String,
    #[serde(default, alias = "newPassword")]
    pub new_password: Option<String>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct CreateConversationResponse {
    pub conversation_id: Uuid,
    pub title: String,
}

#[derive(Serialize, ToSchema)]
pub struct ConversationView {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationView {
    fn from(c: Conversation) -> Self {
        Self {
            id: c.id,
            title: c.title,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationView>,
}

#[derive(Serialize, ToSchema)]
pub struct FunctionCallView {
    pub name: String,
    pub arguments: String,
}

#[derive(Serialize, ToSchema)]
pub struct ToolCallView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCallView,
}

impl From<ToolCall> for ToolCallView {
    fn from(call: ToolCall) -> Self {
        Self {
            id: call.id,
            kind: call.kind,
            function: FunctionCallView {
                name: call.function.name,
                arguments: call.function.arguments,
            },
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct MessageView {
    pub role: String,
    pub content: String,
    pub tool_calls: Option<Vec<ToolCallView>>,
    pub tool_call_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for MessageView {
    fn from(m: Message) -> Self {
        Self {
            role: m.role.to_string(),
            content: m.content,
            tool_calls: m
                .tool_calls
                .map(|calls| calls.into_iter().map(ToolCallView::from).collect()),
            tool_call_id: m.tool_call_id,
            timestamp: m.timestamp,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct MessageListResponse {
    pub messages: Vec<MessageView>,
}

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct GuestChatRequest {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct GuestChatResponse {
    pub response: String,
}

//=========================================================================================
// Profile Handlers
//=========================================================================================

/// GET /api/profile - The caller's account details
#[utoipa::path(
    get,
    path = "/api/profile",
    responses(
        (status = 200, description = "Profile of the logged-in user", body = ProfileResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn get_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .db
        .get_user_by_id(me.user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to load profile"))?;

    Ok(ok(
        "OK",
        ProfileResponse {
            username: user.username,
            email: user.email,
            role: user.role.to_string(),
        },
    ))
}

/// PUT /api/profile - Change email and optionally password
#[utoipa::path(
    put,
    path = "/api/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated"),
        (status = 400, description = "Empty email, wrong current password or short new password"),
        (status = 401, description = "Not authenticated"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn update_profile_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    JsonBody(req): JsonBody<UpdateProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let email = req.email.trim();
    if email.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "Email is required"));
    }

    let credentials = state
        .db
        .get_credentials_by_id(me.user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to load profile"))?;
    if !verify_password(&req.current_password, &credentials.hashed_password) {
        return Err(fail(StatusCode::BAD_REQUEST, "Current password is incorrect"));
    }

    let new_password = req.new_password.as_deref().filter(|p| !p.is_empty());
    let new_hash = match new_password {
        Some(password) => {
            validate_new_password(password)?;
            Some(hash_password(password)?)
        }
        None => None,
    };

    if email != credentials.email {
        state
            .db
            .update_user_email(me.user_id, email)
            .await
            .map_err(|e| match e {
                PortError::Conflict(_) => fail(StatusCode::CONFLICT, "Email already in use"),
                other => port_failure(other, "Failed to update profile"),
            })?;
    }
    if let Some(hash) = new_hash {
        state
            .db
            .update_user_password(me.user_id, &hash)
            .await
            .map_err(|e| port_failure(e, "Failed to update profile"))?;
    }

    info!(user_id = me.user_id, "Profile updated");
    Ok(ok("Profile updated", Empty::default()))
}

//=========================================================================================
// Conversation Handlers
//=========================================================================================

/// GET /api/conversations - List the caller's conversations, newest activity first
#[utoipa::path(
    get,
    path = "/api/conversations",
    responses(
        (status = 200, description = "Conversations of the logged-in user", body = ConversationListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_conversations_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
) -> ApiResult<impl IntoResponse> {
    let conversations = state
        .db
        .list_conversations(me.user_id)
        .await
        .map_err(|e| port_failure(e, "Failed to list conversations"))?;

    Ok(ok(
        "OK",
        ConversationListResponse {
            conversations: conversations.into_iter().map(Into::into).collect(),
        },
    ))
}

/// POST /api/conversations - Start a new, empty conversation
#[utoipa::path(
    post,
    path = "/api/conversations",
    request_body(content = CreateConversationRequest, description = "Optional; the title defaults to \"New Conversation\""),
    responses(
        (status = 201, description = "Conversation created", body = CreateConversationResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    body: Option<JsonBody<CreateConversationRequest>>,
) -> ApiResult<impl IntoResponse> {
    let req = body.map(|JsonBody(req)| req).unwrap_or_default();
    let title = req
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_CONVERSATION_TITLE);

    let conversation = state
        .db
        .create_conversation(me.user_id, title)
        .await
        .map_err(|e| port_failure(e, "Failed to create conversation"))?;

    Ok((
        StatusCode::CREATED,
        respond(
            StatusCode::CREATED,
            "Conversation created",
            CreateConversationResponse {
                conversation_id: conversation.id,
                title: conversation.title,
            },
        ),
    ))
}

/// DELETE /api/conversations/{id} - Delete a conversation and its messages
#[utoipa::path(
    delete,
    path = "/api/conversations/{id}",
    params(("id" = Uuid, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "Conversation deleted"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such conversation for this user")
    )
)]
pub async fn delete_conversation_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state
        .db
        .delete_conversation(me.user_id, conversation_id)
        .await
        .map_err(|e| port_failure(e, "Failed to delete conversation"))?;

    info!(user_id = me.user_id, %conversation_id, "Conversation deleted");
    Ok(ok("Conversation deleted", Empty::default()))
}

/// GET /api/conversations/{id}/messages - Messages of a conversation in timestamp order
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "Ordered messages", body = MessageListResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such conversation for this user")
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    Path(conversation_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state
        .db
        .get_conversation(me.user_id, conversation_id)
        .await
        .map_err(|e| port_failure(e, "Failed to load conversation"))?;

    let messages = state
        .db
        .list_messages(conversation_id)
        .await
        .map_err(|e| port_failure(e, "Failed to load messages"))?;

    Ok(ok(
        "OK",
        MessageListResponse {
            messages: messages.into_iter().map(Into::into).collect(),
        },
    ))
}

//=========================================================================================
// Chat Handlers
//=========================================================================================

/// POST /api/chat - Send a message and receive the assistant's reply
#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Empty message"),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such conversation for this user"),
        (status = 502, description = "The assistant failed to respond"),
        (status = 503, description = "No assistant is configured")
    )
)]
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(me): Extension<SessionUser>,
    JsonBody(req): JsonBody<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let text = req.message.trim();
    if text.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "Message cannot be empty"));
    }
    let assistant = state.assistant.as_ref().ok_or_else(assistant_unavailable)?;

    // 1. Resolve the conversation, starting a new one if none was given
    let conversation = match req.conversation_id {
        Some(id) => state.db.get_conversation(me.user_id, id).await,
        None => {
            let title = format!("Conversation {}", Utc::now().format("%Y-%m-%d %H:%M"));
            state.db.create_conversation(me.user_id, &title).await
        }
    }
    .map_err(|e| port_failure(e, "Failed to open conversation"))?;

    // 2. Persist the user's message
    let prompt = state
        .db
        .append_message(conversation.id, NewMessage::user(text))
        .await
        .map_err(|e| port_failure(e, "Failed to save message"))?;

    // 3. Build the context from everything before the new message
    let messages = state
        .db
        .list_messages(conversation.id)
        .await
        .map_err(|e| port_failure(e, "Failed to load history"))?;
    let history = context_window(
        history_before(&messages, prompt.id),
        state.config.history_limit,
    );

    // 4. Ask the assistant
    let reply = assistant.reply(history, text).await.map_err(|e| {
        error!(conversation_id = %conversation.id, "Assistant failed: {}", e);
        fail(StatusCode::BAD_GATEWAY, "The assistant failed to respond")
    })?;
    let reply = if reply.trim().is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        reply
    };

    // 5. Persist and return the reply
    state
        .db
        .append_message(conversation.id, NewMessage::assistant(reply.clone()))
        .await
        .map_err(|e| port_failure(e, "Failed to save reply"))?;

    Ok(ok(
        "OK",
        ChatResponse {
            response: reply,
            conversation_id: conversation.id,
        },
    ))
}

/// POST /api/chat-guest - One-off chat without login or history
#[utoipa::path(
    post,
    path = "/api/chat-guest",
    request_body = GuestChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = GuestChatResponse),
        (status = 400, description = "Empty message"),
        (status = 502, description = "The assistant failed to respond"),
        (status = 503, description = "No assistant is configured")
    )
)]
pub async fn guest_chat_handler(
    State(state): State<Arc<AppState>>,
    JsonBody(req): JsonBody<GuestChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let text = req.message.trim();
    if text.is_empty() {
        return Err(fail(StatusCode::BAD_REQUEST, "Message cannot be empty"));
    }
    let assistant = state.assistant.as_ref().ok_or_else(assistant_unavailable)?;

    let reply = assistant.reply(&[], text).await.map_err(|e| {
        error!("Assistant failed on guest chat: {}", e);
        fail(StatusCode::BAD_GATEWAY, "The assistant failed to respond")
    })?;
    let response = if reply.trim().is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        reply
    };

    Ok(ok("OK", GuestChatResponse { response }))
}

fn assistant_unavailable() -> ApiFailure {
    fail(
        StatusCode::SERVICE_UNAVAILABLE,
        "The assistant is not configured on this server",
    )
}
