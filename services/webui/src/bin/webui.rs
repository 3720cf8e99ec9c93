//! services/webui/src/bin/webui.rs

use chat_core::domain::{NewUser, UserRole};
use chat_core::ports::{AssistantService, DatabaseService};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use webui_lib::{
    adapters::{chat_llm::OpenAiChatAdapter, db::DbAdapter},
    config::{AdminBootstrap, Config},
    error::ApiError,
    llm_config::LlmConfig,
    web::{self, auth::hash_password, rest::ApiDoc, state::AppState},
};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_adapter = DbAdapter::connect(&config.database_url)
        .await
        .map_err(|e| ApiError::from_db_connect(&config.database_url, e))?;
    info!("Running database migrations...");
    db_adapter
        .run_migrations()
        .await
        .map_err(|e| ApiError::from_db_connect(&config.database_url, e))?;
    info!("Database migrations complete.");
    let db: Arc<dyn DatabaseService> = Arc::new(db_adapter);

    if let Some(admin) = &config.admin_bootstrap {
        bootstrap_super_admin(db.as_ref(), admin).await?;
    }

    // --- 3. Initialize the Assistant ---
    let assistant: Option<Arc<dyn AssistantService>> = match LlmConfig::load(&config.llm_config_path)
    {
        Ok(llm_config) => {
            if llm_config.default.api_type != "openai" {
                warn!(
                    api_type = %llm_config.default.api_type,
                    "Treating the provider as OpenAI-compatible"
                );
            }
            if let Some(vision) = llm_config.vision() {
                info!(model = %vision.model, "Vision profile configured; chat uses the default profile");
            }
            let adapter: Arc<dyn AssistantService> =
                Arc::new(OpenAiChatAdapter::new(&llm_config.default));
            Some(adapter)
        }
        Err(e) => {
            warn!("{}. Chat is disabled until the LLM configuration is fixed.", e);
            None
        }
    };

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db,
        config: config.clone(),
        assistant,
    });

    // --- 5. Create the Web Router ---
    let app = web::router(app_state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(|e| ApiError::from_bind(config.bind_address, e))?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Creates the configured super admin, or promotes the existing account.
async fn bootstrap_super_admin(
    db: &dyn DatabaseService,
    admin: &AdminBootstrap,
) -> Result<(), ApiError> {
    let hashed_password = hash_password(&admin.password)
        .map_err(|_| ApiError::Internal("Failed to hash the admin password".to_string()))?;
    let user = db
        .ensure_super_admin(NewUser {
            username: admin.username.clone(),
            email: admin.email.clone(),
            hashed_password,
            role: UserRole::SuperAdmin,
        })
        .await?;
    info!(user_id = user.id, username = %user.username, "Super admin account ready");
    Ok(())
}
