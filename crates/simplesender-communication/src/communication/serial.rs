//! Serial port communication.
//!
//! Port enumeration filtered to CNC controller patterns plus the
//! [`Communicator`] implementation over the `serialport` crate.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use simplesender_core::{Error, ProtocolError, Result};

use super::{Communicator, ConnectionParams};

/// Information about an available serial port.
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// User-facing description.
    pub description: String,
    /// Manufacturer name if available.
    pub manufacturer: Option<String>,
    /// Serial number if available.
    pub serial_number: Option<String>,
    /// USB vendor ID if applicable.
    pub vid: Option<u16>,
    /// USB product ID if applicable.
    pub pid: Option<u16>,
}

/// List serial ports matching CNC controller patterns.
///
/// - Windows: COM*
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports() -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports
            .iter()
            .filter(|port| is_valid_cnc_port(&port.port_name))
            .map(|port| {
                let mut info = SerialPortInfo {
                    port_name: port.port_name.clone(),
                    description: port_description(port),
                    manufacturer: None,
                    serial_number: None,
                    vid: None,
                    pid: None,
                };
                if let serialport::SerialPortType::UsbPort(usb) = &port.port_type {
                    info.vid = Some(usb.vid);
                    info.pid = Some(usb.pid);
                    info.manufacturer = usb.manufacturer.clone();
                    info.serial_number = usb.serial_number.clone();
                }
                info
            })
            .collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

fn is_valid_cnc_port(port_name: &str) -> bool {
    if port_name.starts_with("COM") && port_name[3..].chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    if port_name.starts_with("/dev/ttyUSB") || port_name.starts_with("/dev/ttyACM") {
        return true;
    }
    if port_name.starts_with("/dev/cu.usbserial-") || port_name.starts_with("/dev/cu.usbmodem") {
        return true;
    }
    false
}

fn port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb) => format!(
            "USB {} {}",
            usb.manufacturer.as_deref().unwrap_or("Device"),
            usb.product.as_deref().unwrap_or("Serial Port")
        ),
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

/// Real serial connection using the `serialport` crate.
#[derive(Default)]
pub struct SerialCommunicator {
    port: Option<Box<dyn serialport::SerialPort>>,
    write_timeout: Duration,
}

impl SerialCommunicator {
    /// Create a closed serial communicator.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialCommunicator {
    fn connect(&mut self, params: &ConnectionParams) -> Result<()> {
        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(Duration::from_millis(params.timeout_ms))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None);

        match builder.open() {
            Ok(port) => {
                self.port = Some(port);
                self.write_timeout = Duration::from_millis(params.write_timeout_ms);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                Err(ProtocolError::OpenFailed {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    fn disconnect(&mut self) -> Result<()> {
        self.port = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut total = 0usize;
        let deadline = std::time::Instant::now() + self.write_timeout;
        while total < data.len() {
            match port.write(&data[total..]) {
                Ok(0) => return Err(ProtocolError::WriteTimeout.into()),
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                    if std::time::Instant::now() >= deadline {
                        return Err(ProtocolError::WriteTimeout.into());
                    }
                }
                Err(e) => {
                    return Err(ProtocolError::UnexpectedClose {
                        reason: format!("serial write error: {}", e),
                    }
                    .into())
                }
            }
        }
        Ok(total)
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut buf = [0u8; 256];
        match port.read(&mut buf) {
            Ok(n) => Ok(buf[..n].to_vec()),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                Ok(Vec::new())
            }
            Err(e) => Err(ProtocolError::UnexpectedClose {
                reason: format!("serial read error: {}", e),
            }
            .into()),
        }
    }
}
