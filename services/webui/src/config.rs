//! services/webui/src/config.rs
//!
//! Defines the process configuration structure and loading logic.
//!
//! All process settings are loaded from environment variables at startup. The `.env`
//! file is used for local development. LLM provider settings live in a separate TOML
//! file, see `llm_config`.

use chat_core::history::DEFAULT_HISTORY_LIMIT;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Credentials of the super admin account ensured at startup.
#[derive(Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("username", &self.username)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub llm_config_path: PathBuf,
    pub admin_config_dir: PathBuf,
    pub session_ttl_days: i64,
    pub cookie_secure: bool,
    pub cors_origin: Option<String>,
    pub history_limit: usize,
    pub admin_bootstrap: Option<AdminBootstrap>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| "sqlite://webui.db".to_string());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- LLM and Admin Config Files ---
        let llm_config_path = lookup("LLM_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config/config.toml"));
        let admin_config_dir = lookup("ADMIN_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| llm_config_path.parent().map(|p| p.to_path_buf()))
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        // --- Sessions ---
        let session_ttl_days = parse_or(&lookup, "SESSION_TTL_DAYS", 30i64)?;
        if session_ttl_days <= 0 {
            return Err(ConfigError::InvalidValue(
                "SESSION_TTL_DAYS".to_string(),
                "must be positive".to_string(),
            ));
        }
        let cookie_secure = parse_or(&lookup, "COOKIE_SECURE", false)?;
        let cors_origin = lookup("CORS_ORIGIN").filter(|v| !v.trim().is_empty());

        let history_limit = parse_or(&lookup, "HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;

        // --- Optional bootstrap super admin ---
        let admin_bootstrap = match (lookup("ADMIN_USERNAME"), lookup("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => {
                let email = lookup("ADMIN_EMAIL")
                    .unwrap_or_else(|| format!("{}@localhost", username));
                Some(AdminBootstrap {
                    username,
                    email,
                    password,
                })
            }
            (Some(_), None) => return Err(ConfigError::MissingVar("ADMIN_PASSWORD".to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingVar("ADMIN_USERNAME".to_string())),
            (None, None) => None,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            llm_config_path,
            admin_config_dir,
            session_ttl_days,
            cookie_secure,
            cors_origin,
            history_limit,
            admin_bootstrap,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
