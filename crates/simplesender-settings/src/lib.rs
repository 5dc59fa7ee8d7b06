//! # Simple Sender Settings
//!
//! Application configuration: the serde model, platform-specific
//! directory resolution (with the `SIMPLE_SENDER_CONFIG_DIR` override),
//! and atomic persistence with backup retention.

pub mod config;
pub mod paths;

pub use config::{Config, ConnectionSettings, MacroSettings, StreamingSettings, UiSettings};
pub use paths::{config_dir, settings_path, ConfigStore};
