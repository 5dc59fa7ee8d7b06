//! Command arbitration.
//!
//! One gate serializes the three producers of outbound traffic: the
//! streaming dispatcher, manual console sends, and the macro executor.
//! It also enforces the alarm lockout allow-list and the disconnect
//! rejection for everything that is not a real-time byte.

use parking_lot::Mutex;
use std::sync::Arc;

use simplesender_core::constants::{RT_RESET, RT_STATUS};
use simplesender_core::types::StreamState;
use simplesender_core::GateError;

/// Shared gate state.
#[derive(Debug, Default)]
struct GateState {
    macro_running: bool,
}

/// The arbiter for manual, macro, and streaming traffic.
#[derive(Debug, Clone, Default)]
pub struct CommandGate {
    state: Arc<Mutex<GateState>>,
}

impl CommandGate {
    /// Create an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a macro holds the gate.
    pub fn macro_running(&self) -> bool {
        self.state.lock().macro_running
    }

    /// Check a manual or macro line against the current stream state.
    pub fn check_line(
        &self,
        connected: bool,
        stream_state: StreamState,
        line: &str,
    ) -> Result<(), GateError> {
        if !connected {
            return Err(GateError::BlockedByDisconnect);
        }
        match stream_state {
            StreamState::Running | StreamState::Paused | StreamState::Stopping => {
                Err(GateError::BlockedByStreaming)
            }
            StreamState::AlarmLocked => {
                let upper = line.trim().to_ascii_uppercase();
                if upper.starts_with("$X") || upper.starts_with("$H") {
                    Ok(())
                } else {
                    Err(GateError::BlockedByAlarm)
                }
            }
            _ => Ok(()),
        }
    }

    /// Check a real-time byte against the current stream state.
    ///
    /// During an alarm only soft reset and status survive; overrides,
    /// hold, and resume are meaningless until the alarm clears.
    pub fn check_realtime(
        &self,
        connected: bool,
        stream_state: StreamState,
        byte: u8,
    ) -> Result<(), GateError> {
        if !connected {
            return Err(GateError::BlockedByDisconnect);
        }
        if stream_state == StreamState::AlarmLocked && byte != RT_RESET && byte != RT_STATUS {
            return Err(GateError::BlockedByAlarm);
        }
        Ok(())
    }

    /// Acquire the gate for a macro run.
    pub fn begin_macro(
        &self,
        connected: bool,
        stream_state: StreamState,
    ) -> Result<MacroPermit, GateError> {
        if !connected {
            return Err(GateError::BlockedByDisconnect);
        }
        if matches!(
            stream_state,
            StreamState::Running | StreamState::Paused | StreamState::Stopping
        ) {
            return Err(GateError::BlockedByStreaming);
        }
        if stream_state == StreamState::AlarmLocked {
            return Err(GateError::BlockedByAlarm);
        }
        let mut state = self.state.lock();
        if state.macro_running {
            return Err(GateError::BlockedByMacro);
        }
        state.macro_running = true;
        Ok(MacroPermit {
            gate: self.state.clone(),
        })
    }

    /// Check that streaming may start.
    pub fn check_stream_start(
        &self,
        connected: bool,
        stream_state: StreamState,
    ) -> Result<(), GateError> {
        if !connected {
            return Err(GateError::BlockedByDisconnect);
        }
        if self.state.lock().macro_running {
            return Err(GateError::BlockedByMacro);
        }
        match stream_state {
            StreamState::Running | StreamState::Paused | StreamState::Stopping => {
                Err(GateError::BlockedByStreaming)
            }
            StreamState::AlarmLocked => Err(GateError::BlockedByAlarm),
            _ => Ok(()),
        }
    }
}

/// RAII permit for a macro run; releases the gate on drop.
#[derive(Debug)]
pub struct MacroPermit {
    gate: Arc<Mutex<GateState>>,
}

impl Drop for MacroPermit {
    fn drop(&mut self) {
        self.gate.lock().macro_running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_blocks_manual() {
        let gate = CommandGate::new();
        assert_eq!(
            gate.check_line(true, StreamState::Running, "G1 X5"),
            Err(GateError::BlockedByStreaming)
        );
        assert!(gate.check_line(true, StreamState::Idle, "G1 X5").is_ok());
    }

    #[test]
    fn alarm_allows_unlock_and_home_only() {
        let gate = CommandGate::new();
        assert!(gate.check_line(true, StreamState::AlarmLocked, "$X").is_ok());
        assert!(gate.check_line(true, StreamState::AlarmLocked, "$H").is_ok());
        assert_eq!(
            gate.check_line(true, StreamState::AlarmLocked, "G1 X5"),
            Err(GateError::BlockedByAlarm)
        );
        assert!(gate
            .check_realtime(true, StreamState::AlarmLocked, RT_RESET)
            .is_ok());
        assert!(gate
            .check_realtime(true, StreamState::AlarmLocked, RT_STATUS)
            .is_ok());
        assert_eq!(
            gate.check_realtime(true, StreamState::AlarmLocked, b'~'),
            Err(GateError::BlockedByAlarm)
        );
    }

    #[test]
    fn disconnect_blocks_everything() {
        let gate = CommandGate::new();
        assert_eq!(
            gate.check_line(false, StreamState::Idle, "G1"),
            Err(GateError::BlockedByDisconnect)
        );
        assert_eq!(
            gate.check_realtime(false, StreamState::Idle, b'?'),
            Err(GateError::BlockedByDisconnect)
        );
    }

    #[test]
    fn macro_permit_is_exclusive() {
        let gate = CommandGate::new();
        let permit = gate.begin_macro(true, StreamState::Idle).unwrap();
        assert_eq!(
            gate.begin_macro(true, StreamState::Idle).err(),
            Some(GateError::BlockedByMacro)
        );
        drop(permit);
        assert!(gate.begin_macro(true, StreamState::Idle).is_ok());
    }
}
