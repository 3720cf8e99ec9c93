//! crates/chat_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or LLM APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Conversation, Message, NewMessage, NewUser, SessionUser, SystemStats, User, UserCredentials,
    UserDetails, UserRole,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---

    /// Inserts a new account. Fails with `Conflict` when the username or email is taken.
    async fn create_user(&self, new_user: NewUser) -> PortResult<User>;

    async fn get_user_by_id(&self, user_id: i64) -> PortResult<User>;

    /// Looks up an *active* account by username, including its password hash.
    async fn get_credentials_by_username(&self, username: &str) -> PortResult<UserCredentials>;

    async fn get_credentials_by_id(&self, user_id: i64) -> PortResult<UserCredentials>;

    async fn record_login(&self, user_id: i64) -> PortResult<()>;

    async fn list_users(&self) -> PortResult<Vec<User>>;

    async fn get_user_details(&self, user_id: i64) -> PortResult<UserDetails>;

    async fn update_user_email(&self, user_id: i64, email: &str) -> PortResult<()>;

    async fn update_user_password(&self, user_id: i64, hashed_password: &str) -> PortResult<()>;

    async fn update_user_role(&self, user_id: i64, role: UserRole) -> PortResult<()>;

    /// Activates or deactivates an account. Deactivation revokes its auth sessions.
    async fn set_user_active(&self, user_id: i64, is_active: bool) -> PortResult<()>;

    /// Returns the number of accounts whose status changed.
    async fn set_users_active(&self, user_ids: &[i64], is_active: bool) -> PortResult<u64>;

    /// Removes an account with all of its conversations, messages and sessions.
    async fn delete_user(&self, user_id: i64) -> PortResult<()>;

    /// Creates the account as super admin, or promotes it if it already exists.
    async fn ensure_super_admin(&self, new_user: NewUser) -> PortResult<User>;

    async fn system_stats(&self) -> PortResult<SystemStats>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves an unexpired session of an active user.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<SessionUser>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Conversation Management ---
    async fn create_conversation(&self, user_id: i64, title: &str) -> PortResult<Conversation>;

    /// Fetches a conversation, failing with `NotFound` if it is not owned by `user_id`.
    async fn get_conversation(&self, user_id: i64, conversation_id: Uuid)
        -> PortResult<Conversation>;

    /// Lists a user's conversations, most recently updated first.
    async fn list_conversations(&self, user_id: i64) -> PortResult<Vec<Conversation>>;

    async fn delete_conversation(&self, user_id: i64, conversation_id: Uuid) -> PortResult<()>;

    // --- Message History ---

    /// Appends a message and bumps the conversation's `updated_at`.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: NewMessage,
    ) -> PortResult<Message>;

    /// Returns all messages of a conversation in timestamp order.
    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>>;
}

/// The bridge to the agent that produces assistant replies.
#[async_trait]
pub trait AssistantService: Send + Sync {
    /// Produces a reply to `prompt`, given the prior turns of the conversation.
    async fn reply(&self, history: &[Message], prompt: &str) -> PortResult<String>;
}
