//! Protocol constants for GRBL 1.1h streaming.
//!
//! Centralizes the buffer sizes, line policy, real-time command bytes, and
//! timing defaults used across the workspace.

use std::time::Duration;

/// Default baud rate for GRBL serial communication (8-N-1).
pub const BAUD_DEFAULT: u32 = 115_200;

/// GRBL RX buffer size in bytes; the conservative streaming window start.
pub const RX_BUFFER_SIZE: usize = 128;

/// Lower bound for the dynamically refined RX window.
pub const RX_WINDOW_FLOOR: usize = 64;

/// Maximum G-code line length in bytes, newline included.
///
/// 80 is the conservative GRBL 1.1h contract; some builds accept more but
/// the sender never relies on that.
pub const MAX_LINE_BYTES: usize = 80;

/// Real-time soft reset (Ctrl-X).
pub const RT_RESET: u8 = 0x18;

/// Real-time status report query.
pub const RT_STATUS: u8 = b'?';

/// Real-time feed hold.
pub const RT_HOLD: u8 = b'!';

/// Real-time cycle start / resume.
pub const RT_RESUME: u8 = b'~';

/// Real-time jog cancel.
pub const RT_JOG_CANCEL: u8 = 0x85;

/// Feed override: reset to 100%.
pub const RT_FEED_RESET: u8 = 0x90;
/// Feed override: +10%.
pub const RT_FEED_PLUS_10: u8 = 0x91;
/// Feed override: -10%.
pub const RT_FEED_MINUS_10: u8 = 0x92;

/// Rapid override: 100%.
pub const RT_RAPID_FULL: u8 = 0x95;
/// Rapid override: 50%.
pub const RT_RAPID_HALF: u8 = 0x96;
/// Rapid override: 25%.
pub const RT_RAPID_QUARTER: u8 = 0x97;

/// Spindle override: reset to 100%.
pub const RT_SPINDLE_RESET: u8 = 0x99;
/// Spindle override: +10%.
pub const RT_SPINDLE_PLUS_10: u8 = 0x9A;
/// Spindle override: -10%.
pub const RT_SPINDLE_MINUS_10: u8 = 0x9B;

/// Default interval between `?` status queries.
pub const STATUS_POLL_DEFAULT: Duration = Duration::from_millis(200);

/// Consecutive status-query failures before the link is declared lost.
pub const STATUS_FAILURE_LIMIT: u32 = 3;

/// Handshake timeout: banner or first status report must arrive within this.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after opening the port; many boards reset on DTR toggle.
pub const SERIAL_CONNECT_DELAY: Duration = Duration::from_millis(250);

/// Serial read timeout (short so worker loops stay responsive).
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial write timeout.
pub const SERIAL_WRITE_TIMEOUT: Duration = Duration::from_millis(500);

/// Initial auto-reconnect delay; doubles per attempt up to the cap.
pub const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Auto-reconnect backoff cap.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// RX silence before the watchdog pauses an active stream.
pub const WATCHDOG_RX_TIMEOUT: Duration = Duration::from_secs(4);

/// RX silence before the watchdog declares the connection lost.
pub const WATCHDOG_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for `%wait` and per-line idle waits in macros.
pub const MACRO_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval used while a macro waits for idle.
pub const MACRO_WAIT_POLL: Duration = Duration::from_millis(100);

/// Cleaned-line count beyond which a job is materialized to a temp file.
pub const STREAMING_LINE_THRESHOLD: usize = 100_000;

/// Raw file size beyond which a job is materialized to a temp file.
pub const STREAMING_SIZE_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Default spindle speed for the manual spindle-on helper.
pub const DEFAULT_SPINDLE_RPM: u32 = 12_000;
