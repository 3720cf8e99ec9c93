pub mod admin;
pub mod auth;
pub mod extract;
pub mod middleware;
pub mod response;
pub mod rest;
pub mod state;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

pub use middleware::{require_admin, require_auth};
pub use state::AppState;

/// Builds the full HTTP router: public auth routes, the logged-in API and the admin API.
pub fn router(state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/login", post(auth::login_handler))
        .route("/register", post(auth::register_handler))
        .route("/logout", get(auth::logout_handler))
        .route("/api/check-auth", get(auth::check_auth_handler))
        .route("/api/chat-guest", post(rest::guest_chat_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/api/profile",
            get(rest::get_profile_handler).put(rest::update_profile_handler),
        )
        .route(
            "/api/conversations",
            get(rest::list_conversations_handler).post(rest::create_conversation_handler),
        )
        .route(
            "/api/conversations/{id}",
            delete(rest::delete_conversation_handler),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(rest::list_messages_handler),
        )
        .route("/api/chat", post(rest::chat_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    // Admin routes; the auth layer is added last so it runs first
    let admin_routes = Router::new()
        .route(
            "/admin/users",
            get(admin::list_users_handler).post(admin::create_user_handler),
        )
        .route("/admin/users/batch", post(admin::batch_handler))
        .route("/admin/users/{id}", delete(admin::delete_user_handler))
        .route("/admin/users/{id}/role", put(admin::update_role_handler))
        .route("/admin/users/{id}/status", put(admin::update_status_handler))
        .route(
            "/admin/users/{id}/reset-password",
            put(admin::reset_password_handler),
        )
        .route("/admin/users/{id}/details", get(admin::user_details_handler))
        .route("/admin/stats", get(admin::stats_handler))
        .route("/admin/config", get(admin::list_config_files_handler))
        .route(
            "/admin/config/{filename}",
            get(admin::get_config_file_handler).put(admin::put_config_file_handler),
        )
        .layer(axum_middleware::from_fn(require_admin))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    let mut app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(state.config.cors_origin.as_deref()) {
        app = app.layer(cors);
    }

    app.with_state(state)
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let origin = origin?;
    let origin = match origin.parse::<HeaderValue>() {
        Ok(origin) => origin,
        Err(e) => {
            warn!("Ignoring invalid CORS_ORIGIN '{}': {}", origin, e);
            return None;
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]),
    )
}
