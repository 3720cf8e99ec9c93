//! End-to-end tests that drive the real router against an in-memory database.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chat_core::domain::{Message, NewUser, UserRole};
use chat_core::ports::{AssistantService, DatabaseService, PortResult};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use webui_lib::{
    adapters::db::DbAdapter,
    config::Config,
    web::{self, auth::hash_password, rest::EMPTY_REPLY_FALLBACK, state::AppState},
};

/// Replies with the prompt and the number of history turns it was given.
struct EchoAssistant;

#[async_trait]
impl AssistantService for EchoAssistant {
    async fn reply(&self, history: &[Message], prompt: &str) -> PortResult<String> {
        Ok(format!("echo: {} ({} prior)", prompt, history.len()))
    }
}

struct SilentAssistant;

#[async_trait]
impl AssistantService for SilentAssistant {
    async fn reply(&self, _history: &[Message], _prompt: &str) -> PortResult<String> {
        Ok(String::new())
    }
}

struct TestApp {
    router: Router,
    db: Arc<dyn DatabaseService>,
    config_dir: TempDir,
}

async fn test_app(assistant: Option<Arc<dyn AssistantService>>) -> TestApp {
    let config_dir = TempDir::new().unwrap();
    let dir = config_dir.path().to_string_lossy().to_string();
    let config = Config::from_lookup(|key| match key {
        "ADMIN_CONFIG_DIR" => Some(dir.clone()),
        _ => None,
    })
    .unwrap();

    let adapter = DbAdapter::connect("sqlite::memory:").await.unwrap();
    adapter.run_migrations().await.unwrap();
    let db: Arc<dyn DatabaseService> = Arc::new(adapter);

    let state = Arc::new(AppState {
        db: db.clone(),
        config: Arc::new(config),
        assistant,
    });
    TestApp {
        router: web::router(state),
        db,
        config_dir,
    }
}

async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, HeaderMap, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, value)
}

async fn register(app: &TestApp, username: &str, email: &str, password: &str) -> StatusCode {
    let body = json!({"username": username, "email": email, "password": password});
    send(app, Method::POST, "/register", None, Some(body)).await.0
}

/// Logs in and returns the `session=<id>` cookie pair.
async fn login(app: &TestApp, username: &str, password: &str) -> String {
    let body = json!({"username": username, "password": password});
    let (status, headers, _) = send(app, Method::POST, "/login", None, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    let set_cookie = headers
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn signed_in_user(app: &TestApp, username: &str) -> String {
    let email = format!("{}@example.com", username);
    assert_eq!(register(app, username, &email, "secret1").await, StatusCode::CREATED);
    login(app, username, "secret1").await
}

async fn signed_in_with_role(app: &TestApp, username: &str, role: UserRole) -> String {
    app.db
        .create_user(NewUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            hashed_password: hash_password("secret1").unwrap(),
            role,
        })
        .await
        .unwrap();
    login(app, username, "secret1").await
}

#[tokio::test]
async fn duplicate_registration_is_a_conflict() {
    let app = test_app(None).await;

    let body = json!({"username": "alice", "email": "alice@example.com", "password": "secret1"});
    let (status, _, value) = send(&app, Method::POST, "/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(value["code"], 201);

    let body = json!({"username": "alice", "email": "other@example.com", "password": "secret1"});
    let (status, _, value) = send(&app, Method::POST, "/register", None, Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(value["code"], 409);
    assert_eq!(value["message"], "Username or email already exists");

    assert_eq!(
        register(&app, "alicia", "alice@example.com", "secret1").await,
        StatusCode::CONFLICT
    );
    assert_eq!(
        register(&app, "bob", "bob@example.com", "123").await,
        StatusCode::BAD_REQUEST
    );
    assert_eq!(
        register(&app, " ", "bob@example.com", "secret1").await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn only_a_successful_login_updates_last_login() {
    let app = test_app(None).await;
    assert_eq!(
        register(&app, "alice", "alice@example.com", "secret1").await,
        StatusCode::CREATED
    );
    let user_id = app
        .db
        .get_credentials_by_username("alice")
        .await
        .unwrap()
        .user_id;

    let body = json!({"username": "alice", "password": "wrong-password"});
    let (status, headers, value) = send(&app, Method::POST, "/login", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(value["code"], 401);
    assert!(headers.get(header::SET_COOKIE).is_none());
    assert!(app.db.get_user_by_id(user_id).await.unwrap().last_login.is_none());

    let body = json!({"username": "alice", "password": "secret1"});
    let (status, headers, value) = send(&app, Method::POST, "/login", None, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({"code": 200, "message": "Login successful"}));
    let set_cookie = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
    assert!(set_cookie.starts_with("session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(app.db.get_user_by_id(user_id).await.unwrap().last_login.is_some());
}

#[tokio::test]
async fn protected_routes_need_a_live_session() {
    let app = test_app(None).await;

    let (status, _, value) = send(&app, Method::GET, "/api/conversations", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(value["code"], 401);

    let bogus = Some("session=00000000-0000-0000-0000-000000000000");
    let (status, _, _) = send(&app, Method::GET, "/api/conversations", bogus, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let cookie = signed_in_user(&app, "alice").await;
    let (status, _, value) = send(&app, Method::GET, "/api/check-auth", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["authenticated"], true);
    assert_eq!(value["username"], "alice");

    let (status, _, _) = send(&app, Method::GET, "/logout", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&app, Method::GET, "/api/conversations", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (_, _, value) = send(&app, Method::GET, "/api/check-auth", Some(&cookie), None).await;
    assert_eq!(value["authenticated"], false);
}

#[tokio::test]
async fn conversations_are_created_listed_and_deleted_per_user() {
    let app = test_app(None).await;
    let alice = signed_in_user(&app, "alice").await;
    let bob = signed_in_user(&app, "bob").await;

    let (status, _, untitled) =
        send(&app, Method::POST, "/api/conversations", Some(&alice), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(untitled["title"], "New Conversation");

    let body = json!({"title": "Trip planning"});
    let (_, _, titled) =
        send(&app, Method::POST, "/api/conversations", Some(&alice), Some(body)).await;
    assert_eq!(titled["title"], "Trip planning");

    let (_, _, listed) = send(&app, Method::GET, "/api/conversations", Some(&alice), None).await;
    assert_eq!(listed["conversations"].as_array().unwrap().len(), 2);
    let (_, _, listed) = send(&app, Method::GET, "/api/conversations", Some(&bob), None).await;
    assert!(listed["conversations"].as_array().unwrap().is_empty());

    let id = titled["conversation_id"].as_str().unwrap();
    let messages_uri = format!("/api/conversations/{}/messages", id);
    let (status, _, _) = send(&app, Method::GET, &messages_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let delete_uri = format!("/api/conversations/{}", id);
    let (status, _, _) = send(&app, Method::DELETE, &delete_uri, Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, Method::DELETE, &delete_uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, listed) = send(&app, Method::GET, "/api/conversations", Some(&alice), None).await;
    assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn chat_saves_both_turns_and_passes_prior_history() {
    let app = test_app(Some(Arc::new(EchoAssistant))).await;
    let alice = signed_in_user(&app, "alice").await;

    let body = json!({"message": "hello"});
    let (status, _, first) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["response"], "echo: hello (0 prior)");
    let conversation_id = first["conversation_id"].as_str().unwrap().to_string();

    let body = json!({"message": "again", "conversation_id": conversation_id});
    let (_, _, second) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(second["response"], "echo: again (2 prior)");
    assert_eq!(second["conversation_id"], conversation_id.as_str());

    let (_, _, listed) = send(&app, Method::GET, "/api/conversations", Some(&alice), None).await;
    let conversations = listed["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert!(conversations[0]["title"]
        .as_str()
        .unwrap()
        .starts_with("Conversation "));

    let uri = format!("/api/conversations/{}/messages", conversation_id);
    let (status, _, value) = send(&app, Method::GET, &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = value["messages"].as_array().unwrap();
    let roles: Vec<&str> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
    assert_eq!(roles, ["user", "assistant", "user", "assistant"]);
    assert_eq!(messages[0]["content"], "hello");
    assert!(messages[0]["tool_calls"].is_null());
    let timestamps: Vec<&str> = messages
        .iter()
        .map(|m| m["timestamp"].as_str().unwrap())
        .collect();
    let parsed: Vec<chrono::DateTime<chrono::Utc>> =
        timestamps.iter().map(|t| t.parse().unwrap()).collect();
    assert!(parsed.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn chat_rejects_empty_messages_and_unknown_conversations() {
    let app = test_app(Some(Arc::new(EchoAssistant))).await;
    let alice = signed_in_user(&app, "alice").await;

    let body = json!({"message": "   "});
    let (status, _, _) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"message": "hi", "conversation_id": uuid::Uuid::new_v4()});
    let (status, _, _) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_is_unavailable_without_an_assistant() {
    let app = test_app(None).await;
    let alice = signed_in_user(&app, "alice").await;

    let body = json!({"message": "hello"});
    let (status, _, value) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(value["code"], 503);

    let (_, _, listed) = send(&app, Method::GET, "/api/conversations", Some(&alice), None).await;
    assert!(listed["conversations"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_replies_are_replaced_and_guests_can_chat() {
    let app = test_app(Some(Arc::new(SilentAssistant))).await;
    let alice = signed_in_user(&app, "alice").await;

    let body = json!({"message": "hello"});
    let (_, _, value) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(value["response"], EMPTY_REPLY_FALLBACK);

    let body = json!({"message": "hello"});
    let (status, _, value) = send(&app, Method::POST, "/api/chat-guest", None, Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["response"], EMPTY_REPLY_FALLBACK);
}

#[tokio::test]
async fn profile_changes_need_the_current_password() {
    let app = test_app(None).await;
    let alice = signed_in_user(&app, "alice").await;

    let (_, _, profile) = send(&app, Method::GET, "/api/profile", Some(&alice), None).await;
    assert_eq!(profile["email"], "alice@example.com");
    assert_eq!(profile["role"], "user");

    let body = json!({"email": "new@example.com", "current_password": "nope"});
    let (status, _, _) = send(&app, Method::PUT, "/api/profile", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({
        "email": "new@example.com",
        "currentPassword": "secret1",
        "newPassword": "secret2"
    });
    let (status, _, _) = send(&app, Method::PUT, "/api/profile", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    login(&app, "alice", "secret2").await;
}

#[tokio::test]
async fn admin_routes_check_roles() {
    let app = test_app(None).await;
    let user = signed_in_user(&app, "alice").await;
    let admin = signed_in_with_role(&app, "ops", UserRole::Admin).await;

    let (status, _, value) = send(&app, Method::GET, "/admin/users", Some(&user), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value["code"], 403);
    let (status, _, _) = send(&app, Method::GET, "/admin/users", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, value) = send(&app, Method::GET, "/admin/users", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["users"].as_array().unwrap().len(), 2);

    let alice_id = app.db.get_credentials_by_username("alice").await.unwrap().user_id;
    let uri = format!("/admin/users/{}", alice_id);
    let (status, _, _) = send(&app, Method::DELETE, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let body = json!({"username": "root2", "email": "r@example.com", "password": "secret1", "role": "admin"});
    let (status, _, _) = send(&app, Method::POST, "/admin/users", Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/admin/users/{}/status", alice_id);
    let body = json!({"is_active": false});
    let (status, _, _) = send(&app, Method::PUT, &uri, Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&app, Method::GET, "/api/profile", Some(&user), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, _, stats) = send(&app, Method::GET, "/admin/stats", Some(&admin), None).await;
    assert_eq!(stats["users"]["total"], 2);
    assert_eq!(stats["users"]["inactive"], 1);
}

#[tokio::test]
async fn batch_operations_exclude_the_caller() {
    let app = test_app(None).await;
    signed_in_user(&app, "alice").await;
    signed_in_user(&app, "bob").await;
    let root = signed_in_with_role(&app, "root", UserRole::SuperAdmin).await;
    let id = |name: &'static str| {
        let db = app.db.clone();
        async move { db.get_credentials_by_username(name).await.unwrap().user_id }
    };
    let (alice, bob, me) = (id("alice").await, id("bob").await, id("root").await);

    let body = json!({"operation": "delete", "user_ids": []});
    let (status, _, _) = send(&app, Method::POST, "/admin/users/batch", Some(&root), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"operation": "deactivate", "user_ids": [alice, me]});
    let (status, _, _) = send(&app, Method::POST, "/admin/users/batch", Some(&root), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"operation": "delete", "user_ids": [alice, bob]});
    let (status, _, value) =
        send(&app, Method::POST, "/admin/users/batch", Some(&root), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["affected_count"], 2);
    let (_, _, value) = send(&app, Method::GET, "/admin/users", Some(&root), None).await;
    assert_eq!(value["users"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admins_cannot_manage_a_super_admin() {
    let app = test_app(None).await;
    let root = signed_in_with_role(&app, "root", UserRole::SuperAdmin).await;
    let admin = signed_in_with_role(&app, "ops", UserRole::Admin).await;
    let root_id = app.db.get_credentials_by_username("root").await.unwrap().user_id;
    let ops_id = app.db.get_credentials_by_username("ops").await.unwrap().user_id;

    let uri = format!("/admin/users/{}/reset-password", root_id);
    let body = json!({"new_password": "taken1"});
    let (status, _, value) = send(&app, Method::PUT, &uri, Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(value["code"], 403);

    let uri = format!("/admin/users/{}/status", root_id);
    let body = json!({"is_active": false});
    let (status, _, _) = send(&app, Method::PUT, &uri, Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let body = json!({"operation": "deactivate", "user_ids": [root_id]});
    let (status, _, _) =
        send(&app, Method::POST, "/admin/users/batch", Some(&admin), Some(body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The super admin is untouched and can still sign in with the old password.
    assert!(app.db.get_user_by_id(root_id).await.unwrap().is_active);
    login(&app, "root", "secret1").await;

    let uri = format!("/admin/users/{}/reset-password", ops_id);
    let body = json!({"new_password": "rotated1"});
    let (status, _, _) = send(&app, Method::PUT, &uri, Some(&root), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    login(&app, "ops", "rotated1").await;
}

#[tokio::test]
async fn malformed_bodies_are_answered_in_the_envelope() {
    let app = test_app(Some(Arc::new(EchoAssistant))).await;
    let alice = signed_in_user(&app, "alice").await;

    let body = json!({"username": "alice"});
    let (status, _, value) = send(&app, Method::POST, "/login", None, Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(value["code"], 422);
    assert!(value["message"].as_str().unwrap().contains("password"));

    let body = json!({"message": "hi", "conversation_id": "not-a-uuid"});
    let (status, _, value) = send(&app, Method::POST, "/api/chat", Some(&alice), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(value["code"], 422);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/chat")
        .header(header::COOKIE, &alice)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["code"], 400);

    // A missing body is still fine where the body is optional.
    let (status, _, _) = send(&app, Method::POST, "/api/conversations", Some(&alice), None).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn config_editor_is_confined_to_its_directory() {
    let app = test_app(None).await;
    let admin = signed_in_with_role(&app, "ops", UserRole::Admin).await;
    let root = signed_in_with_role(&app, "root", UserRole::SuperAdmin).await;

    let (status, _, _) = send(&app, Method::GET, "/admin/config", Some(&admin), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, _) =
        send(&app, Method::GET, "/admin/config/..%2Fsecret.toml", Some(&root), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({"content": "[llm\nmodel = "});
    let (status, _, _) =
        send(&app, Method::PUT, "/admin/config/config.toml", Some(&root), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!app.config_dir.path().join("config.toml").exists());

    let body = json!({"content": "[llm]\nmodel = \"gpt-4o\"\n"});
    let (status, _, _) =
        send(&app, Method::PUT, "/admin/config/config.toml", Some(&root), Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    std::fs::write(app.config_dir.path().join("notes.txt"), "ignored").unwrap();

    let (_, _, value) = send(&app, Method::GET, "/admin/config", Some(&root), None).await;
    assert_eq!(value["files"], json!(["config.toml"]));
    let (_, _, value) =
        send(&app, Method::GET, "/admin/config/config.toml", Some(&root), None).await;
    assert_eq!(value["content"], "[llm]\nmodel = \"gpt-4o\"\n");
    let (status, _, _) =
        send(&app, Method::GET, "/admin/config/missing.toml", Some(&root), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
