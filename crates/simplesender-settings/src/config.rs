//! Configuration model.
//!
//! Settings are grouped into sections; every field has a default so a
//! missing or partial file loads cleanly.

use serde::{Deserialize, Serialize};
use simplesender_core::types::StopMode;

/// Connection section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Last used port, reconnect target.
    pub last_port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// Status poll interval in milliseconds.
    pub status_poll_ms: u64,
    /// Consecutive status-query failures before the link counts as lost.
    pub status_failure_limit: u32,
    /// Reconnect automatically after unexpected closes.
    pub auto_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            last_port: None,
            baud_rate: 115_200,
            status_poll_ms: 200,
            status_failure_limit: 3,
            auto_reconnect: false,
        }
    }
}

/// Streaming section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// All-stop behavior.
    pub stop_mode: StopMode,
    /// Strip spindle/coolant/tool words while streaming.
    pub dry_run_sanitize: bool,
    /// Cleaned-line count that switches loads to a temp file.
    pub streaming_line_threshold: usize,
    /// Raw byte size that switches loads to a temp file.
    pub streaming_size_threshold: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            stop_mode: StopMode::default(),
            dry_run_sanitize: false,
            streaming_line_threshold: 100_000,
            streaming_size_threshold: 8 * 1024 * 1024,
        }
    }
}

/// Macro section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroSettings {
    /// Allow expressions/assignments/control flow in macros.
    pub scripting_enabled: bool,
    /// Extra directories searched for macro files (leftmost wins).
    pub search_paths: Vec<String>,
}

impl Default for MacroSettings {
    fn default() -> Self {
        Self {
            scripting_enabled: false,
            search_paths: Vec::new(),
        }
    }
}

/// UI-facing toggles the core honors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Show position/status reports in the console.
    pub console_positions: bool,
    /// Jog feed rate, units per minute.
    pub jog_feed: f64,
    /// Metric jog steps.
    pub jog_metric: bool,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            console_positions: false,
            jog_feed: 1000.0,
            jog_metric: true,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Connection section.
    pub connection: ConnectionSettings,
    /// Streaming section.
    pub streaming: StreamingSettings,
    /// Macro section.
    pub macros: MacroSettings,
    /// UI section.
    pub ui: UiSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.connection.baud_rate, 115_200);
        assert_eq!(back.connection.status_poll_ms, 200);
        assert_eq!(back.streaming.stop_mode, StopMode::FlushThenReset);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"connection":{"last_port":"/dev/ttyUSB0"}}"#).unwrap();
        assert_eq!(config.connection.last_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.status_failure_limit, 3);
        assert!(!config.macros.scripting_enabled);
    }
}
