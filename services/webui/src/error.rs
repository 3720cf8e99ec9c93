//! services/webui/src/error.rs
//!
//! Defines the primary error type for the entire web UI service.

use crate::config::ConfigError;
use crate::llm_config::LlmConfigError;
use chat_core::ports::PortError;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// The primary error type for the `webui` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during environment configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The LLM provider configuration is missing or invalid.
    #[error("LLM configuration error: {0}")]
    LlmConfig(#[from] LlmConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// The database file or its directory cannot be opened or written.
    #[error("Permission denied opening database '{url}': {reason}")]
    DatabasePermissionDenied { url: String, reason: String },

    /// Represents any other error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// The listen address is taken by another process.
    #[error("Port already in use: {0} (stop the other process or set BIND_ADDRESS)")]
    PortInUse(SocketAddr),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl ApiError {
    /// Classifies a failure to open the database, singling out permission problems.
    pub fn from_db_connect(url: &str, err: sqlx::Error) -> Self {
        if is_permission_error(url, &err) {
            return ApiError::DatabasePermissionDenied {
                url: url.to_string(),
                reason: err.to_string(),
            };
        }
        ApiError::Database(err)
    }

    /// Classifies a failure to bind the listener.
    pub fn from_bind(addr: SocketAddr, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::AddrInUse => ApiError::PortInUse(addr),
            _ => ApiError::Io(err),
        }
    }
}

fn is_permission_error(url: &str, err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(io) => io.kind() == std::io::ErrorKind::PermissionDenied,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            // SQLITE_READONLY (8) and SQLITE_PERM (3).
            if matches!(code.as_deref(), Some("3") | Some("8"))
                || db_err.message().contains("readonly")
            {
                return true;
            }
            // SQLITE_CANTOPEN (14) is also raised for a missing directory.
            let cant_open = code.as_deref() == Some("14")
                || db_err.message().contains("unable to open database file");
            cant_open && database_dir(url).is_some_and(|dir| dir.is_dir())
        }
        _ => false,
    }
}

/// The directory holding the database file, or `None` for in-memory URLs.
fn database_dir(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    let parent = Path::new(path).parent()?;
    if parent.as_os_str().is_empty() {
        Some(PathBuf::from("."))
    } else {
        Some(parent.to_path_buf())
    }
}
