//! # Simple Sender Communication
//!
//! Serial transport, GRBL 1.1h protocol parsing, and the streaming
//! controller: character-counting flow control, pause/resume/stop,
//! real-time overrides, alarm lockout, and the connection manager.

pub mod communication;
pub mod connection;
pub mod gate;
pub mod grbl;

pub use communication::{
    framing::LineFramer,
    serial::{list_ports, SerialCommunicator, SerialPortInfo},
    Communicator, ConnectionParams, NoOpCommunicator,
};
pub use connection::{ConnectionManager, ConnectionPolicy};
pub use gate::{CommandGate, MacroPermit};
pub use grbl::{
    controller::{ControllerEvent, GrblController},
    overrides::{override_plan, rapid_override_byte, OverrideKind},
    response::{parse_response, GrblResponse},
    status::{StatusReport, StatusTracker},
    stream::{StreamCore, StreamErrorInfo, StreamEvent},
};
