//! Transport abstraction.
//!
//! The [`Communicator`] trait is the seam between the GRBL controller and
//! the physical link; production uses the serial implementation, tests use
//! scripted mocks.

pub mod framing;
pub mod serial;

use simplesender_core::constants::{BAUD_DEFAULT, SERIAL_READ_TIMEOUT, SERIAL_WRITE_TIMEOUT};
use simplesender_core::Result;

/// Parameters for opening a connection.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Serial port name (e.g. `/dev/ttyUSB0`, `COM3`).
    pub port: String,
    /// Baud rate; GRBL 1.1h runs 115200 8-N-1.
    pub baud_rate: u32,
    /// Read timeout in milliseconds.
    pub timeout_ms: u64,
    /// Write timeout in milliseconds.
    pub write_timeout_ms: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BAUD_DEFAULT,
            timeout_ms: SERIAL_READ_TIMEOUT.as_millis() as u64,
            write_timeout_ms: SERIAL_WRITE_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Low-level connection driver.
///
/// `send` must be atomic with respect to concurrent callers (the
/// controller serializes writes); `receive` returns whatever bytes are
/// available, possibly none, without blocking longer than the configured
/// read timeout.
pub trait Communicator: Send {
    /// Open the connection.
    fn connect(&mut self, params: &ConnectionParams) -> Result<()>;

    /// Close the connection.
    fn disconnect(&mut self) -> Result<()>;

    /// True while the link is open.
    fn is_connected(&self) -> bool;

    /// Write raw bytes; returns the count written.
    fn send(&mut self, data: &[u8]) -> Result<usize>;

    /// Read available bytes, empty when none arrived within the timeout.
    fn receive(&mut self) -> Result<Vec<u8>>;
}

/// Communicator that drops everything; placeholder before a port is chosen.
#[derive(Debug, Default)]
pub struct NoOpCommunicator {
    connected: bool,
}

impl NoOpCommunicator {
    /// Create a disconnected no-op communicator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for NoOpCommunicator {
    fn connect(&mut self, _params: &ConnectionParams) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}
