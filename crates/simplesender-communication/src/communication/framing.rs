//! Inbound record framing.
//!
//! GRBL terminates responses with CRLF but real-time status reports can
//! arrive interleaved anywhere in the byte stream; the framer buffers
//! partial reads and emits one record per terminator.

/// Incremental LF/CR framer.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes and drain all complete records.
    ///
    /// Records are returned trimmed; empty records (from CRLF pairs or
    /// keep-alive blank lines) are dropped.
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut out = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n' || b == b'\r') else {
                break;
            };
            let record: Vec<u8> = self.buf.drain(..=pos).take(pos).collect();
            let text = String::from_utf8_lossy(&record);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        }
        out
    }

    /// Bytes currently buffered without a terminator.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial record (used across reconnects).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_across_partial_reads() {
        let mut f = LineFramer::new();
        assert!(f.push(b"o").is_empty());
        assert_eq!(f.push(b"k\r\nerror:2").len(), 1);
        assert_eq!(f.push(b"0\r\n"), vec!["error:20".to_string()]);
    }

    #[test]
    fn status_interleaved_with_acks() {
        let mut f = LineFramer::new();
        let records = f.push(b"ok\r\n<Idle|MPos:0.000,0.000,0.000|Bf:120,15>\r\nok\r\n");
        assert_eq!(records.len(), 3);
        assert!(records[1].starts_with('<'));
    }

    #[test]
    fn bare_cr_terminates() {
        let mut f = LineFramer::new();
        assert_eq!(f.push(b"ok\rok\r"), vec!["ok".to_string(), "ok".to_string()]);
    }
}
