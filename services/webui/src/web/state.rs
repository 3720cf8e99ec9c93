//! services/webui/src/web/state.rs
//!
//! Defines the application state shared by all handlers.

use crate::config::Config;
use chat_core::ports::{AssistantService, DatabaseService};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    /// `None` when no usable LLM configuration was found at startup.
    pub assistant: Option<Arc<dyn AssistantService>>,
}
