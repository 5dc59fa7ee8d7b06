//! Error handling for Simple Sender.
//!
//! Provides error types for all layers of the sender:
//! - Load errors (G-code file processing)
//! - Protocol errors (GRBL wire protocol, serial I/O)
//! - Gate errors (command arbitration)
//! - Macro errors (macro compilation/execution)
//! - Validation errors (per-line send-time checks)
//! - Config errors (settings persistence)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Errors raised while loading and processing a G-code job file.
#[derive(Error, Debug)]
pub enum LoadError {
    /// A non-ASCII byte was found after BOM stripping.
    #[error("Non-ASCII byte at line {line}")]
    NonAscii {
        /// 1-based input line number.
        line: usize,
    },

    /// A line exceeds the limit and cannot be split.
    #[error("Line {line} is {len} bytes and cannot be split")]
    OverlongUnsplittable {
        /// 1-based input line number.
        line: usize,
        /// Length in bytes, newline included.
        len: usize,
    },

    /// A `$` system command was found in the job file.
    #[error("System command in job file at line {line}: {text}")]
    SystemCommandInJob {
        /// 1-based input line number.
        line: usize,
        /// The offending line text.
        text: String,
    },

    /// The streaming temp file could not be created or written.
    #[error("Temp file for streaming job is not writable: {reason}")]
    NotWritableForTemp {
        /// Underlying cause.
        reason: String,
    },

    /// Underlying file I/O failure.
    #[error("I/O error while loading job: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the GRBL wire protocol and serial transport.
#[derive(Error, Debug, Clone)]
pub enum ProtocolError {
    /// GRBL answered a line with `error:N`.
    #[error("GRBL error:{code} ({description})")]
    GrblError {
        /// Numeric error code.
        code: u8,
        /// Decoded description.
        description: String,
    },

    /// GRBL raised `ALARM:N`.
    #[error("GRBL ALARM:{code} ({description})")]
    GrblAlarm {
        /// Numeric alarm code.
        code: u8,
        /// Decoded description.
        description: String,
    },

    /// The connection closed without a user disconnect.
    #[error("Connection closed unexpectedly: {reason}")]
    UnexpectedClose {
        /// What triggered the close.
        reason: String,
    },

    /// A serial write did not complete within the write timeout.
    #[error("Serial write timed out")]
    WriteTimeout,

    /// Inbound bytes could not be framed into records.
    #[error("Read framing error: {reason}")]
    ReadFramingError {
        /// What went wrong while framing.
        reason: String,
    },

    /// The port could not be opened.
    #[error("Failed to open port {port}: {reason}")]
    OpenFailed {
        /// Port name.
        port: String,
        /// Underlying cause.
        reason: String,
    },

    /// Operation requires an open connection.
    #[error("Not connected")]
    NotConnected,
}

/// Errors raised by the command gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Manual/macro sends are blocked while a stream is active.
    #[error("Blocked: stream is active")]
    BlockedByStreaming,

    /// Only unlock/home/reset/status are allowed during an alarm.
    #[error("Blocked: alarm lockout")]
    BlockedByAlarm,

    /// Nothing can be sent without a connection.
    #[error("Blocked: not connected")]
    BlockedByDisconnect,

    /// Another macro already holds the gate.
    #[error("Blocked: another macro is running")]
    BlockedByMacro,
}

/// Errors raised while compiling or executing macros.
#[derive(Error, Debug, Clone)]
pub enum MacroError {
    /// Scripting constructs used while scripting is disabled.
    #[error("Macro scripting is disabled in settings")]
    ScriptingDisabled,

    /// A macro line failed to compile.
    #[error("Macro compile error at line {line}: {reason}")]
    CompileError {
        /// 1-based macro file line number.
        line: usize,
        /// Compiler diagnostic.
        reason: String,
    },

    /// An expression failed to evaluate.
    #[error("Macro evaluation error: {reason}")]
    EvalError {
        /// Evaluator diagnostic.
        reason: String,
    },

    /// A wait (`%wait` or per-line idle wait) timed out.
    #[error("Macro wait timed out")]
    Timeout,

    /// GRBL alarmed while the macro was running.
    #[error("Alarm during macro at line {line}")]
    AlarmDuringMacro {
        /// 1-based macro file line number.
        line: usize,
    },
}

/// Errors raised by send-time line validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Line exceeds the byte limit, newline included.
    #[error("Line too long ({len} > {max} bytes): {text}")]
    LineTooLong {
        /// Byte length including newline.
        len: usize,
        /// Allowed maximum.
        max: usize,
        /// The offending text.
        text: String,
    },

    /// Line contains bytes outside tab/printable-ASCII.
    #[error("Non-ASCII characters in line: {text}")]
    NonAsciiLine {
        /// The offending text.
        text: String,
    },
}

/// Errors raised by settings persistence.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file could not be read or parsed.
    #[error("Failed to load settings: {reason}")]
    LoadFailed {
        /// Underlying cause.
        reason: String,
    },

    /// Settings file could not be written.
    #[error("Failed to save settings: {reason}")]
    SaveFailed {
        /// Underlying cause.
        reason: String,
    },

    /// Underlying I/O failure.
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Unified error type for Simple Sender.
#[derive(Error, Debug)]
pub enum Error {
    /// Job load error.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Protocol / transport error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Command gate rejection.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// Macro error.
    #[error(transparent)]
    Macro(#[from] MacroError),

    /// Line validation error.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Settings error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a gate rejection.
    pub fn is_gate_error(&self) -> bool {
        matches!(self, Error::Gate(_))
    }

    /// Check if this is a validation failure.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Check if this represents a lost connection.
    pub fn is_unexpected_close(&self) -> bool {
        matches!(self, Error::Protocol(ProtocolError::UnexpectedClose { .. }))
    }
}

/// Result type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
