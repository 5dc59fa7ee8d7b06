//! Shared test harness: a scripted mock link driven the same way the
//! worker threads drive the real one.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use simplesender_communication::{Communicator, ConnectionParams};
use simplesender_core::Result;

/// Captured outbound traffic.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Captured {
    /// All writes so far.
    pub fn all(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    /// Outbound G-code/system lines (newline-terminated writes), decoded
    /// without the terminator.
    pub fn lines(&self) -> Vec<String> {
        self.all()
            .iter()
            .filter(|w| w.last() == Some(&b'\n'))
            .map(|w| String::from_utf8_lossy(&w[..w.len() - 1]).into_owned())
            .collect()
    }

    /// Real-time bytes (single-byte writes without terminator).
    pub fn realtime(&self) -> Vec<u8> {
        self.all()
            .iter()
            .filter(|w| w.len() == 1)
            .map(|w| w[0])
            .collect()
    }

    /// Count of line writes.
    pub fn line_count(&self) -> usize {
        self.lines().len()
    }
}

/// Mock communicator: records writes, replays scripted inbound chunks.
pub struct MockLink {
    pub captured: Captured,
    inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    connected: bool,
}

/// Handle for feeding inbound data after the link moved into the
/// controller.
#[derive(Clone)]
pub struct Feeder {
    inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl Feeder {
    /// Queue a raw inbound chunk.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.inbound.lock().push_back(bytes.to_vec());
    }

    /// Queue a CRLF-terminated line.
    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{line}\r\n").as_bytes());
    }

    /// Queue `ok` lines.
    pub fn push_ok(&self, count: usize) {
        for _ in 0..count {
            self.push_line("ok");
        }
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.inbound.lock().is_empty()
    }
}

impl MockLink {
    /// Create a connected mock link plus its capture and feeder handles.
    pub fn new() -> (Box<dyn Communicator>, Captured, Feeder) {
        let captured = Captured::default();
        let inbound: Arc<Mutex<VecDeque<Vec<u8>>>> = Arc::default();
        let link = MockLink {
            captured: captured.clone(),
            inbound: inbound.clone(),
            connected: true,
        };
        (Box::new(link), captured, Feeder { inbound })
    }
}

impl Communicator for MockLink {
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
        self.captured.writes.lock().push(data.to_vec());
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Vec<u8>> {
        Ok(self.inbound.lock().pop_front().unwrap_or_default())
    }
}
