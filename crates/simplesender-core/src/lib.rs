//! # Simple Sender Core
//!
//! Core types, errors, and protocol constants shared by the Simple Sender
//! crates. Provides the stream/machine state model, the pending-entry
//! bookkeeping types used by the streaming controller, and the GRBL 1.1h
//! error/alarm code tables.

pub mod constants;
pub mod error;
pub mod grbl_codes;
pub mod types;

pub use error::{
    ConfigError, Error, GateError, LoadError, MacroError, ProtocolError, Result, ValidationError,
};
pub use grbl_codes::{
    alarm_description, annotate_alarm, annotate_error, annotate_message, error_description,
};
pub use types::{
    Axis, LineClass, MachineState, ModalSnapshot, PendingEntry, PinFlags, StopMode, StreamState,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration.
///
/// Sets up `tracing` with console output and `RUST_LOG` environment
/// variable support.
pub fn init_logging() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()?;
    Ok(())
}
