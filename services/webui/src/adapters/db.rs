//! services/webui/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the SQLite database using `sqlx`.

use async_trait::async_trait;
use chat_core::domain::{
    Conversation, CountStats, Message, MessageRole, NewMessage, NewUser, SessionUser,
    SystemStats, ToolCall, User, UserCredentials, UserDetails, UserRole, UserStats,
};
use chat_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if missing) the SQLite database behind `database_url`.
    ///
    /// In-memory databases are pinned to a single long-lived connection, since every
    /// new connection to `:memory:` would otherwise see an empty database.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(std::time::Duration::from_secs(3))
                .connect_with(options)
                .await?
        };

        info!(database_url = %database_url, "SQLite pool ready");
        Ok(Self::new(pool))
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Formats timestamps with a fixed width so that text ordering matches time ordering.
fn db_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Maps constraint violations onto the port's error vocabulary.
fn constraint_error(e: sqlx::Error, what: &str) -> PortError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.is_unique_violation() {
            return PortError::Conflict(format!("{} already exists", what));
        }
        if db_err.is_foreign_key_violation() {
            return PortError::NotFound(format!("{} refers to a missing record", what));
        }
    }
    unexpected(e)
}

fn not_found(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        other => unexpected(other),
    }
}

fn ensure_affected(rows: u64, what: String) -> PortResult<()> {
    if rows == 0 {
        Err(PortError::NotFound(what))
    } else {
        Ok(())
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    username: String,
    email: String,
    role: String,
    created_at: DateTime<Utc>,
    last_login: Option<DateTime<Utc>>,
    is_active: bool,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        Ok(User {
            id: self.id,
            username: self.username,
            email: self.email,
            role: self.role.parse().map_err(PortError::Unexpected)?,
            created_at: self.created_at,
            last_login: self.last_login,
            is_active: self.is_active,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    id: i64,
    username: String,
    email: String,
    role: String,
    password_hash: String,
    is_active: bool,
}
impl CredentialsRecord {
    fn to_domain(self) -> PortResult<UserCredentials> {
        Ok(UserCredentials {
            user_id: self.id,
            username: self.username,
            email: self.email,
            role: self.role.parse().map_err(PortError::Unexpected)?,
            hashed_password: self.password_hash,
            is_active: self.is_active,
        })
    }
}

#[derive(FromRow)]
struct SessionUserRecord {
    id: i64,
    username: String,
    role: String,
}
impl SessionUserRecord {
    fn to_domain(self) -> PortResult<SessionUser> {
        Ok(SessionUser {
            user_id: self.id,
            username: self.username,
            role: self.role.parse().map_err(PortError::Unexpected)?,
        })
    }
}

#[derive(FromRow)]
struct ConversationRecord {
    id: String,
    user_id: i64,
    title: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> PortResult<Conversation> {
        Ok(Conversation {
            id: Uuid::parse_str(&self.id).map_err(|e| PortError::Unexpected(e.to_string()))?,
            user_id: self.user_id,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: i64,
    conversation_id: String,
    role: String,
    content: String,
    tool_calls: Option<String>,
    tool_call_id: Option<String>,
    timestamp: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        let tool_calls = self
            .tool_calls
            .as_deref()
            .map(serde_json::from_str::<Vec<ToolCall>>)
            .transpose()
            .map_err(|e| PortError::Unexpected(format!("Corrupt tool_calls payload: {}", e)))?;

        Ok(Message {
            id: self.id,
            conversation_id: Uuid::parse_str(&self.conversation_id)
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
            role: self.role.parse().map_err(PortError::Unexpected)?,
            content: self.content,
            tool_calls,
            tool_call_id: self.tool_call_id,
            timestamp: self.timestamp,
        })
    }
}

const USER_COLUMNS: &str = "id, username, email, role, created_at, last_login, is_active";
const CREDENTIAL_COLUMNS: &str = "id, username, email, role, password_hash, is_active";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(&self, new_user: NewUser) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (username, email, password_hash, role, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&new_user.username)
        .bind(&new_user.email)
        .bind(&new_user.hashed_password)
        .bind(new_user.role.as_str())
        .bind(db_timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "Username or email"))?;

        debug!(user_id = record.id, username = %record.username, "User created");
        record.to_domain()
    }

    async fn get_user_by_id(&self, user_id: i64) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, format!("User {} not found", user_id)))?
        .to_domain()
    }

    async fn get_credentials_by_username(&self, username: &str) -> PortResult<UserCredentials> {
        sqlx::query_as::<_, CredentialsRecord>(&format!(
            "SELECT {} FROM users WHERE username = ? AND is_active = 1",
            CREDENTIAL_COLUMNS
        ))
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, format!("Active user '{}' not found", username)))?
        .to_domain()
    }

    async fn get_credentials_by_id(&self, user_id: i64) -> PortResult<UserCredentials> {
        sqlx::query_as::<_, CredentialsRecord>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            CREDENTIAL_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, format!("User {} not found", user_id)))?
        .to_domain()
    }

    async fn record_login(&self, user_id: i64) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(db_timestamp(Utc::now()))
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        ensure_affected(result.rows_affected(), format!("User {} not found", user_id))
    }

    async fn list_users(&self) -> PortResult<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC, id DESC",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_user_details(&self, user_id: i64) -> PortResult<UserDetails> {
        let user = self.get_user_by_id(user_id).await?;

        let conversation_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(unexpected)?;

        let message_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE conversation_id IN \
             (SELECT id FROM conversations WHERE user_id = ?)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(UserDetails {
            user,
            conversation_count,
            message_count,
        })
    }

    async fn update_user_email(&self, user_id: i64, email: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET email = ? WHERE id = ?")
            .bind(email)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Email"))?;
        ensure_affected(result.rows_affected(), format!("User {} not found", user_id))
    }

    async fn update_user_password(&self, user_id: i64, hashed_password: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hashed_password)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        ensure_affected(result.rows_affected(), format!("User {} not found", user_id))
    }

    async fn update_user_role(&self, user_id: i64, role: UserRole) -> PortResult<()> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        ensure_affected(result.rows_affected(), format!("User {} not found", user_id))
    }

    async fn set_user_active(&self, user_id: i64, is_active: bool) -> PortResult<()> {
        let updated = self.set_users_active(&[user_id], is_active).await?;
        ensure_affected(updated, format!("User {} not found", user_id))
    }

    async fn set_users_active(&self, user_ids: &[i64], is_active: bool) -> PortResult<u64> {
        if user_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let mut update: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE users SET is_active = ");
        update.push_bind(is_active).push(" WHERE id IN (");
        let mut ids = update.separated(", ");
        for id in user_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
        let updated = update
            .build()
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();

        if !is_active {
            let mut revoke: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM auth_sessions WHERE user_id IN (");
            let mut ids = revoke.separated(", ");
            for id in user_ids {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");
            revoke.build().execute(&mut *tx).await.map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(updated)
    }

    async fn delete_user(&self, user_id: i64) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "DELETE FROM messages WHERE conversation_id IN \
             (SELECT id FROM conversations WHERE user_id = ?)",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query("DELETE FROM conversations WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        sqlx::query("DELETE FROM auth_sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let deleted = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?
            .rows_affected();

        if deleted == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }

        tx.commit().await.map_err(unexpected)?;
        info!(user_id, "User and all related data deleted");
        Ok(())
    }

    async fn ensure_super_admin(&self, new_user: NewUser) -> PortResult<User> {
        let existing = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(&new_user.username)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match existing {
            Some(record) => {
                let user = record.to_domain()?;
                if user.role != UserRole::SuperAdmin {
                    self.update_user_role(user.id, UserRole::SuperAdmin).await?;
                    info!(username = %user.username, "Promoted existing user to super admin");
                }
                self.get_user_by_id(user.id).await
            }
            None => {
                let user = self
                    .create_user(NewUser {
                        role: UserRole::SuperAdmin,
                        ..new_user
                    })
                    .await?;
                info!(username = %user.username, "Created super admin account");
                Ok(user)
            }
        }
    }

    async fn system_stats(&self) -> PortResult<SystemStats> {
        let count = |sql: &'static str| async move {
            sqlx::query_scalar::<_, i64>(sql)
                .fetch_one(&self.pool)
                .await
                .map_err(unexpected)
        };

        let total = count("SELECT COUNT(*) FROM users").await?;
        let active = count("SELECT COUNT(*) FROM users WHERE is_active = 1").await?;
        let admin = count("SELECT COUNT(*) FROM users WHERE role = 'admin'").await?;
        let super_admin = count("SELECT COUNT(*) FROM users WHERE role = 'super_admin'").await?;

        let recent_active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE last_login > ?")
                .bind(db_timestamp(Utc::now() - Duration::days(7)))
                .fetch_one(&self.pool)
                .await
                .map_err(unexpected)?;

        Ok(SystemStats {
            users: UserStats {
                total,
                active,
                inactive: total - active,
                admin,
                super_admin,
                recent_active,
            },
            conversations: CountStats {
                total: count("SELECT COUNT(*) FROM conversations").await?,
            },
            messages: CountStats {
                total: count("SELECT COUNT(*) FROM messages").await?,
            },
        })
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(session_id)
            .bind(user_id)
            .bind(db_timestamp(expires_at))
            .execute(&self.pool)
            .await
            .map_err(|e| constraint_error(e, "Auth session"))?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<SessionUser> {
        let record = sqlx::query_as::<_, SessionUserRecord>(
            "SELECT u.id, u.username, u.role FROM auth_sessions s \
             JOIN users u ON u.id = s.user_id \
             WHERE s.id = ? AND s.expires_at > ? AND u.is_active = 1",
        )
        .bind(session_id)
        .bind(db_timestamp(Utc::now()))
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        record.ok_or(PortError::Unauthorized)?.to_domain()
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_conversation(&self, user_id: i64, title: &str) -> PortResult<Conversation> {
        let now = db_timestamp(Utc::now());
        sqlx::query_as::<_, ConversationRecord>(
            "INSERT INTO conversations (id, user_id, title, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING id, user_id, title, created_at, updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(title)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| constraint_error(e, "Conversation"))?
        .to_domain()
    }

    async fn get_conversation(
        &self,
        user_id: i64,
        conversation_id: Uuid,
    ) -> PortResult<Conversation> {
        sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations \
             WHERE id = ? AND user_id = ?",
        )
        .bind(conversation_id.to_string())
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found(e, format!("Conversation {} not found", conversation_id)))?
        .to_domain()
    }

    async fn list_conversations(&self, user_id: i64) -> PortResult<Vec<Conversation>> {
        let records = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, user_id, title, created_at, updated_at FROM conversations \
             WHERE user_id = ? ORDER BY updated_at DESC, created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn delete_conversation(&self, user_id: i64, conversation_id: Uuid) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let id = conversation_id.to_string();

        let owned: Option<String> =
            sqlx::query_scalar("SELECT id FROM conversations WHERE id = ? AND user_id = ?")
                .bind(&id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(unexpected)?;
        if owned.is_none() {
            return Err(PortError::NotFound(format!(
                "Conversation {} not found",
                conversation_id
            )));
        }

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: NewMessage,
    ) -> PortResult<Message> {
        let tool_calls_json = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let timestamp = Utc::now();
        let stamp = db_timestamp(timestamp);
        let id = conversation_id.to_string();

        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let message_id: i64 = sqlx::query_scalar(
            "INSERT INTO messages (conversation_id, role, content, tool_calls, tool_call_id, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(&id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(&tool_calls_json)
        .bind(&message.tool_call_id)
        .bind(&stamp)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| constraint_error(e, "Message"))?;

        sqlx::query("UPDATE conversations SET updated_at = ? WHERE id = ?")
            .bind(&stamp)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;

        Ok(Message {
            id: message_id,
            conversation_id,
            role: message.role,
            content: message.content,
            tool_calls: message.tool_calls,
            tool_call_id: message.tool_call_id,
            timestamp,
        })
    }

    async fn list_messages(&self, conversation_id: Uuid) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, conversation_id, role, content, tool_calls, tool_call_id, timestamp \
             FROM messages WHERE conversation_id = ? ORDER BY timestamp ASC, id ASC",
        )
        .bind(conversation_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::domain::FunctionCall;

    async fn setup() -> DbAdapter {
        let db = DbAdapter::connect("sqlite::memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
            hashed_password: "hash".to_string(),
            role: UserRole::User,
        }
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_a_conflict() {
        let db = setup().await;
        db.create_user(new_user("alice", "alice@example.com")).await.unwrap();

        let same_name = db.create_user(new_user("alice", "other@example.com")).await;
        assert!(matches!(same_name, Err(PortError::Conflict(_))));

        let same_email = db.create_user(new_user("bob", "alice@example.com")).await;
        assert!(matches!(same_email, Err(PortError::Conflict(_))));

        assert_eq!(db.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn conversation_requires_an_existing_user() {
        let db = setup().await;
        let result = db.create_conversation(42, "orphan").await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn message_requires_an_existing_conversation() {
        let db = setup().await;
        let result = db
            .append_message(Uuid::new_v4(), NewMessage::user("hello"))
            .await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn stored_messages_cannot_be_edited() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let conversation = db.create_conversation(user.id, "chat").await.unwrap();
        let message = db
            .append_message(conversation.id, NewMessage::user("original"))
            .await
            .unwrap();

        let edit = sqlx::query("UPDATE messages SET content = 'rewritten' WHERE id = ?")
            .bind(message.id)
            .execute(&db.pool)
            .await;
        let err = edit.unwrap_err().to_string();
        assert!(err.contains("messages are immutable"), "{err}");

        let stored = db.list_messages(conversation.id).await.unwrap();
        assert_eq!(stored[0].content, "original");
    }

    #[tokio::test]
    async fn messages_come_back_in_timestamp_order_with_tool_payloads() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let conversation = db.create_conversation(user.id, "chat").await.unwrap();

        db.append_message(conversation.id, NewMessage::user("first")).await.unwrap();
        db.append_message(
            conversation.id,
            NewMessage {
                role: MessageRole::Assistant,
                content: String::new(),
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".to_string(),
                    kind: "function".to_string(),
                    function: FunctionCall {
                        name: "search".to_string(),
                        arguments: r#"{"q":"rust"}"#.to_string(),
                    },
                }]),
                tool_call_id: None,
            },
        )
        .await
        .unwrap();
        db.append_message(
            conversation.id,
            NewMessage {
                role: MessageRole::Tool,
                content: "results".to_string(),
                tool_calls: None,
                tool_call_id: Some("call_1".to_string()),
            },
        )
        .await
        .unwrap();
        db.append_message(conversation.id, NewMessage::assistant("done")).await.unwrap();

        let messages = db.list_messages(conversation.id).await.unwrap();
        assert_eq!(messages.len(), 4);
        assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].tool_calls.as_ref().unwrap()[0].function.name, "search");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(messages[3].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn appending_a_message_bumps_the_conversation() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let older = db.create_conversation(user.id, "older").await.unwrap();
        let newer = db.create_conversation(user.id, "newer").await.unwrap();

        let listed = db.list_conversations(user.id).await.unwrap();
        assert_eq!(listed[0].id, newer.id);

        db.append_message(older.id, NewMessage::user("ping")).await.unwrap();
        let listed = db.list_conversations(user.id).await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert!(listed[0].updated_at >= older.updated_at);
    }

    #[tokio::test]
    async fn conversations_are_scoped_to_their_owner() {
        let db = setup().await;
        let alice = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let bob = db.create_user(new_user("bob", "bob@example.com")).await.unwrap();
        let conversation = db.create_conversation(alice.id, "private").await.unwrap();

        assert!(db.get_conversation(alice.id, conversation.id).await.is_ok());
        assert!(matches!(
            db.get_conversation(bob.id, conversation.id).await,
            Err(PortError::NotFound(_))
        ));
        assert!(matches!(
            db.delete_conversation(bob.id, conversation.id).await,
            Err(PortError::NotFound(_))
        ));
        assert!(db.list_conversations(bob.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_conversation_removes_its_messages() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let conversation = db.create_conversation(user.id, "chat").await.unwrap();
        db.append_message(conversation.id, NewMessage::user("hi")).await.unwrap();

        db.delete_conversation(user.id, conversation.id).await.unwrap();

        assert!(db.list_messages(conversation.id).await.unwrap().is_empty());
        assert_eq!(db.system_stats().await.unwrap().messages.total, 0);
    }

    #[tokio::test]
    async fn record_login_sets_last_login() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        assert!(user.last_login.is_none());

        db.record_login(user.id).await.unwrap();

        let reloaded = db.get_user_by_id(user.id).await.unwrap();
        assert!(reloaded.last_login.is_some());
    }

    #[tokio::test]
    async fn inactive_users_have_no_credentials_or_sessions() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        db.create_auth_session("sid", user.id, Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(db.validate_auth_session("sid").await.unwrap().user_id, user.id);

        db.set_user_active(user.id, false).await.unwrap();

        assert!(matches!(
            db.validate_auth_session("sid").await,
            Err(PortError::Unauthorized)
        ));
        assert!(matches!(
            db.get_credentials_by_username("alice").await,
            Err(PortError::NotFound(_))
        ));
        assert!(!db.get_user_by_id(user.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        db.create_auth_session("old", user.id, Utc::now() - Duration::minutes(1))
            .await
            .unwrap();

        assert!(matches!(
            db.validate_auth_session("old").await,
            Err(PortError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn deleting_a_user_removes_everything_it_owns() {
        let db = setup().await;
        let user = db.create_user(new_user("alice", "alice@example.com")).await.unwrap();
        let conversation = db.create_conversation(user.id, "chat").await.unwrap();
        db.append_message(conversation.id, NewMessage::user("hi")).await.unwrap();

        db.delete_user(user.id).await.unwrap();

        let stats = db.system_stats().await.unwrap();
        assert_eq!(stats.users.total, 0);
        assert_eq!(stats.conversations.total, 0);
        assert_eq!(stats.messages.total, 0);
        assert!(matches!(db.delete_user(user.id).await, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn ensure_super_admin_creates_then_promotes() {
        let db = setup().await;
        let created = db
            .ensure_super_admin(new_user("root", "root@example.com"))
            .await
            .unwrap();
        assert_eq!(created.role, UserRole::SuperAdmin);

        db.update_user_role(created.id, UserRole::User).await.unwrap();
        let promoted = db
            .ensure_super_admin(new_user("root", "root@example.com"))
            .await
            .unwrap();
        assert_eq!(promoted.id, created.id);
        assert_eq!(promoted.role, UserRole::SuperAdmin);
    }

    #[tokio::test]
    async fn batch_status_updates_and_stats() {
        let db = setup().await;
        let a = db.create_user(new_user("a", "a@example.com")).await.unwrap();
        let b = db.create_user(new_user("b", "b@example.com")).await.unwrap();
        let c = db.create_user(new_user("c", "c@example.com")).await.unwrap();
        db.update_user_role(c.id, UserRole::Admin).await.unwrap();
        db.record_login(c.id).await.unwrap();

        assert_eq!(db.set_users_active(&[a.id, b.id], false).await.unwrap(), 2);
        assert_eq!(db.set_users_active(&[], false).await.unwrap(), 0);

        let stats = db.system_stats().await.unwrap();
        assert_eq!(stats.users.total, 3);
        assert_eq!(stats.users.active, 1);
        assert_eq!(stats.users.inactive, 2);
        assert_eq!(stats.users.admin, 1);
        assert_eq!(stats.users.recent_active, 1);

        let details = db.get_user_details(c.id).await.unwrap();
        assert_eq!(details.conversation_count, 0);
    }
}
