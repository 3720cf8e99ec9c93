pub mod adapters;
pub mod config;
pub mod error;
pub mod llm_config;
pub mod web;
