//! Shared protocol types.
//!
//! The state model for the streaming controller, the pending-entry
//! bookkeeping used by character-counting flow control, and the modal
//! snapshot captured for resume and macro restore.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Machine state token from a GRBL status report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineState {
    /// Machine idle, ready for commands.
    Idle,
    /// Executing motion.
    Run,
    /// Feed hold active.
    Hold,
    /// Alarm lockout; motion disabled until cleared.
    Alarm,
    /// Safety door state.
    Door,
    /// Check-mode (G-code verified, no motion).
    Check,
    /// Homing cycle in progress.
    Home,
    /// Sleep state.
    Sleep,
    /// Jog motion in progress.
    Jog,
}

impl MachineState {
    /// Parse the leading state token of a status report.
    ///
    /// GRBL suffixes sub-states (`Hold:0`, `Door:1`); the prefix decides.
    pub fn parse(token: &str) -> Option<Self> {
        let t = token.trim();
        let state = if t.starts_with("Idle") {
            Self::Idle
        } else if t.starts_with("Run") {
            Self::Run
        } else if t.starts_with("Hold") {
            Self::Hold
        } else if t.starts_with("Alarm") {
            Self::Alarm
        } else if t.starts_with("Door") {
            Self::Door
        } else if t.starts_with("Check") {
            Self::Check
        } else if t.starts_with("Home") {
            Self::Home
        } else if t.starts_with("Sleep") {
            Self::Sleep
        } else if t.starts_with("Jog") {
            Self::Jog
        } else {
            return None;
        };
        Some(state)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Home => "Home",
            Self::Sleep => "Sleep",
            Self::Jog => "Jog",
        };
        write!(f, "{}", s)
    }
}

/// Host-side stream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// No job armed.
    Idle,
    /// Job loaded and armed, not yet running.
    Armed,
    /// Dispatching lines under flow control.
    Running,
    /// Feed hold or auto-pause; acks still drain.
    Paused,
    /// Stop requested; draining before reset.
    Stopping,
    /// GRBL rejected a line; dispatch halted until cleared.
    Errored,
    /// Alarm lockout; only $X/$H/reset/status may pass.
    AlarmLocked,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Errored => "errored",
            Self::AlarmLocked => "alarm-locked",
        };
        write!(f, "{}", s)
    }
}

/// Behavior of the all-stop action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopMode {
    /// Send the soft reset immediately.
    SoftReset,
    /// Halt dispatch and drain bookkeeping, then soft reset.
    FlushThenReset,
}

impl Default for StopMode {
    fn default() -> Self {
        Self::FlushThenReset
    }
}

/// Origin of an outbound line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    /// Line from the armed job.
    Job,
    /// Manual console / UI button line.
    Manual,
    /// Line dispatched by the macro executor.
    Macro,
}

/// One outbound line awaiting its `ok`/`error:N` acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    /// Zero-based job line index; `None` for manual/macro/preamble lines.
    pub index: Option<usize>,
    /// Byte length on the wire, newline included.
    pub byte_len: usize,
    /// Monotonic send timestamp.
    pub sent_at: Instant,
    /// Who produced the line.
    pub class: LineClass,
    /// Set for M0/M1/M6 lines; the ack transitions the stream to Paused.
    pub pause_after_ack: bool,
    /// Line text without terminator, kept for error reporting.
    pub text: String,
}

impl PendingEntry {
    /// Build an entry for a job line.
    pub fn job(index: usize, text: impl Into<String>, byte_len: usize, pause: bool) -> Self {
        Self {
            index: Some(index),
            byte_len,
            sent_at: Instant::now(),
            class: LineClass::Job,
            pause_after_ack: pause,
            text: text.into(),
        }
    }

    /// Build an entry for a manual or macro line.
    pub fn immediate(class: LineClass, text: impl Into<String>, byte_len: usize) -> Self {
        Self {
            index: None,
            byte_len,
            sent_at: Instant::now(),
            class,
            pause_after_ack: false,
            text: text.into(),
        }
    }
}

/// Machine axes handled by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// X axis.
    X,
    /// Y axis.
    Y,
    /// Z axis.
    Z,
}

impl Axis {
    /// Word letter for this axis.
    pub fn letter(self) -> char {
        match self {
            Self::X => 'X',
            Self::Y => 'Y',
            Self::Z => 'Z',
        }
    }
}

/// Input pin flags from the `Pn:` status field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinFlags {
    /// X limit.
    pub x: bool,
    /// Y limit.
    pub y: bool,
    /// Z limit.
    pub z: bool,
    /// Probe.
    pub probe: bool,
    /// Door.
    pub door: bool,
    /// Hold.
    pub hold: bool,
    /// Soft reset.
    pub reset: bool,
    /// Cycle start.
    pub start: bool,
}

impl PinFlags {
    /// Parse the `Pn:` field payload (e.g. `XYZ`, `PD`).
    pub fn parse(flags: &str) -> Self {
        let mut out = Self::default();
        for ch in flags.chars() {
            match ch {
                'X' => out.x = true,
                'Y' => out.y = true,
                'Z' => out.z = true,
                'P' => out.probe = true,
                'D' => out.door = true,
                'H' => out.hold = true,
                'R' => out.reset = true,
                'S' => out.start = true,
                _ => {}
            }
        }
        out
    }
}

/// Spindle modal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleMode {
    /// M3 clockwise.
    Cw,
    /// M4 counter-clockwise.
    Ccw,
    /// M5 off.
    Off,
}

/// Coolant modal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolantMode {
    /// M7 mist.
    Mist,
    /// M8 flood.
    Flood,
    /// M9 off.
    Off,
}

/// Sticky modal words that define the meaning of subsequent lines.
///
/// Captured by the modal pre-scanner before a resume and by the macro
/// executor before a run ($G parser state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalSnapshot {
    /// Motion mode word (`G0`, `G1`, `G2`, `G3`) if seen.
    pub motion: Option<String>,
    /// Plane select: G17/G18/G19.
    pub plane: Option<String>,
    /// Units: G20/G21.
    pub units: Option<String>,
    /// Distance mode: G90/G91.
    pub distance: Option<String>,
    /// Arc distance mode: G90.1/G91.1.
    pub arc_distance: Option<String>,
    /// Feed mode: G93/G94/G95.
    pub feed_mode: Option<String>,
    /// Work coordinate system: G54..G59.
    pub wcs: Option<String>,
    /// Spindle modal.
    pub spindle: Option<SpindleMode>,
    /// Coolant modal.
    pub coolant: Option<CoolantMode>,
    /// Last programmed feed rate.
    pub feed: Option<f64>,
    /// Last programmed spindle speed.
    pub spindle_speed: Option<f64>,
    /// Selected tool number.
    pub tool: Option<u32>,
}
