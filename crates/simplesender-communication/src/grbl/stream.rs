//! Character-counting streaming core.
//!
//! Single-owner state machine behind the GRBL controller: tracks the RX
//! window, the FIFO of unacked lines, the stream state transitions, and
//! the auto-pause / error / alarm semantics. All methods are synchronous;
//! the worker threads and the tests drive it the same way.

use std::collections::VecDeque;

use simplesender_core::constants::{MAX_LINE_BYTES, RX_BUFFER_SIZE, RX_WINDOW_FLOOR};
use simplesender_core::types::{LineClass, PendingEntry, StreamState};
use simplesender_core::ValidationError;
use simplesender_gcode::words::parse_words;

/// Latched information about a stream error.
#[derive(Debug, Clone)]
pub struct StreamErrorInfo {
    /// GRBL error code.
    pub code: u8,
    /// Zero-based job line index, when the errored line was a job line.
    pub line_index: Option<usize>,
    /// The errored line text.
    pub line_text: Option<String>,
    /// Annotated message for the console.
    pub message: String,
}

/// Outcome of feeding an acknowledgment into the core.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Nothing user-visible happened.
    None,
    /// A job line completed.
    Acked {
        /// Zero-based job line index.
        index: usize,
        /// Completed line count (acked + skipped).
        done: usize,
        /// Total job lines.
        total: usize,
    },
    /// A manual or macro line completed.
    ImmediateAcked {
        /// The completed line text.
        text: String,
    },
    /// The M0/M1/M6 ack arrived; the stream paused.
    AutoPaused {
        /// Zero-based job line index of the pause line.
        index: usize,
        /// The pause word (`M0`, `M1`, `M6`).
        word: String,
    },
    /// All job lines acked; the stream finished.
    Completed,
    /// GRBL rejected a line mid-stream.
    Errored(StreamErrorInfo),
    /// GRBL rejected a manual/macro line outside streaming.
    ImmediateErrored {
        /// GRBL error code.
        code: u8,
        /// The rejected line, when one was pending.
        text: Option<String>,
    },
}

/// A dispatch prepared but not yet written to the link.
#[derive(Debug)]
pub struct Prepared {
    /// Wire payload, newline included.
    pub payload: Vec<u8>,
    /// Bookkeeping entry to commit after a successful write.
    pub entry: PendingEntry,
    /// True when the line came from the resume preamble.
    pub from_preamble: bool,
}

/// M codes stripped from job lines in dry-run mode.
const DRY_RUN_M_CODES: [i64; 7] = [3, 4, 5, 6, 7, 8, 9];

fn pause_word(text: &str) -> Option<&'static str> {
    let words = parse_words(&text.to_ascii_uppercase());
    let first = words.first()?;
    if first.letter != 'M' {
        return None;
    }
    let value = first.number()?;
    if (value - value.round()).abs() > 1e-9 {
        return None;
    }
    match value.round() as i64 {
        0 => Some("M0"),
        1 => Some("M1"),
        6 => Some("M6"),
        _ => None,
    }
}

/// Validate a candidate wire line: byte policy and ASCII-only.
pub fn validate_wire_line(text: &str) -> Result<(), ValidationError> {
    if !text
        .bytes()
        .all(|b| b == 0x09 || (0x20..=0x7e).contains(&b))
    {
        return Err(ValidationError::NonAsciiLine {
            text: text.to_string(),
        });
    }
    if text.len() + 1 > MAX_LINE_BYTES {
        return Err(ValidationError::LineTooLong {
            len: text.len() + 1,
            max: MAX_LINE_BYTES,
            text: text.to_string(),
        });
    }
    Ok(())
}

/// Strip spindle/coolant/tool words from a job line for dry runs.
fn sanitize_dry_run(text: &str) -> String {
    let upper = text.to_ascii_uppercase();
    let words = parse_words(&upper);
    let mut out = String::new();
    for w in &words {
        match w.letter {
            'S' | 'T' => continue,
            'M' => {
                if let Some(v) = w.number() {
                    if (v - v.round()).abs() < 1e-9 && DRY_RUN_M_CODES.contains(&(v.round() as i64))
                    {
                        continue;
                    }
                }
                out.push_str(&format!("{}{}", w.letter, w.value));
            }
            _ => out.push_str(&format!("{}{}", w.letter, w.value)),
        }
    }
    out
}

/// The streaming state machine.
#[derive(Debug)]
pub struct StreamCore {
    state: StreamState,
    window: usize,
    pending: VecDeque<PendingEntry>,
    in_flight: usize,
    total: usize,
    send_index: usize,
    /// Job lines whose ack arrived.
    acked: usize,
    /// Job lines skipped without sending (dry-run emptied them).
    skipped: usize,
    /// Dispatch does not pass this job index until its ack clears it.
    pause_barrier: Option<usize>,
    preamble: VecDeque<String>,
    dry_run: bool,
    last_error: Option<StreamErrorInfo>,
    resume_default: Option<usize>,
}

impl Default for StreamCore {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamCore {
    /// Create an idle core with the conservative window.
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            window: RX_BUFFER_SIZE,
            pending: VecDeque::new(),
            in_flight: 0,
            total: 0,
            send_index: 0,
            acked: 0,
            skipped: 0,
            pause_barrier: None,
            preamble: VecDeque::new(),
            dry_run: false,
            last_error: None,
            resume_default: None,
        }
    }

    /// Current stream state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Current RX window in bytes.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Bytes in flight (sum of unacked line lengths).
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Unacked entries.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Next job line index to dispatch.
    pub fn send_index(&self) -> usize {
        self.send_index
    }

    /// Completed line count (acked + skipped).
    pub fn done(&self) -> usize {
        self.acked + self.skipped
    }

    /// Latched last stream error.
    pub fn last_error(&self) -> Option<&StreamErrorInfo> {
        self.last_error.as_ref()
    }

    /// Default Resume-From target (zero-based).
    pub fn resume_default(&self) -> Option<usize> {
        self.resume_default
    }

    /// Enable or disable dry-run sanitizing for job lines.
    pub fn set_dry_run(&mut self, enabled: bool) {
        self.dry_run = enabled;
    }

    /// True while a job is streaming (running or paused).
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.state,
            StreamState::Running | StreamState::Paused | StreamState::Stopping
        )
    }

    /// Arm a job of `total` lines. Valid from Idle/Armed/Errored.
    pub fn arm(&mut self, total: usize) {
        debug_assert!(!self.is_streaming());
        self.state = StreamState::Armed;
        self.total = total;
        self.send_index = 0;
        self.acked = 0;
        self.skipped = 0;
        self.pause_barrier = None;
        self.preamble.clear();
        self.pending.clear();
        self.in_flight = 0;
        self.window = RX_BUFFER_SIZE;
        self.last_error = None;
    }

    /// Start dispatching from line zero.
    pub fn run(&mut self) {
        debug_assert_eq!(self.state, StreamState::Armed);
        self.state = StreamState::Running;
    }

    /// Start dispatching from `start_index` with an optional preamble.
    pub fn run_from(&mut self, start_index: usize, preamble: Vec<String>) {
        debug_assert_eq!(self.state, StreamState::Armed);
        self.send_index = start_index.min(self.total);
        self.acked = 0;
        self.skipped = self.send_index;
        self.preamble = preamble
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        self.state = StreamState::Running;
    }

    /// Feed hold requested. Running -> Paused.
    pub fn pause(&mut self) -> bool {
        if self.state == StreamState::Running {
            self.state = StreamState::Paused;
            return true;
        }
        false
    }

    /// Cycle start requested. Paused -> Running.
    pub fn resume(&mut self) -> bool {
        if self.state == StreamState::Paused {
            self.state = StreamState::Running;
            return true;
        }
        false
    }

    /// Stop requested; dispatch halts while bookkeeping drains.
    pub fn begin_stop(&mut self) {
        if self.is_streaming() || self.state == StreamState::Errored {
            self.state = StreamState::Stopping;
        }
    }

    /// Finish a stop after the reset byte went out.
    pub fn finish_stop(&mut self) {
        self.resume_default = self.send_index.checked_sub(1);
        self.pending.clear();
        self.preamble.clear();
        self.in_flight = 0;
        self.pause_barrier = None;
        self.state = StreamState::Idle;
    }

    /// Operator acknowledged the stream error.
    pub fn clear_error(&mut self) {
        if self.state == StreamState::Errored {
            self.state = StreamState::Idle;
        }
    }

    /// Drop all stream state back to Idle (soft reset / disconnect).
    ///
    /// Keeps the resume default at the last sent line when a stream was
    /// interrupted.
    pub fn reset(&mut self) {
        if self.is_streaming() {
            self.resume_default = self.send_index.checked_sub(1);
        }
        self.pending.clear();
        self.preamble.clear();
        self.in_flight = 0;
        self.pause_barrier = None;
        self.window = RX_BUFFER_SIZE;
        self.state = StreamState::Idle;
    }

    /// Alarm raised: lock out everything, drop all pending bookkeeping.
    pub fn alarm(&mut self) {
        self.pending.clear();
        self.preamble.clear();
        self.in_flight = 0;
        self.pause_barrier = None;
        self.state = StreamState::AlarmLocked;
    }

    /// An Idle status arrived after $X/$H while alarm-locked.
    pub fn alarm_cleared(&mut self) -> bool {
        if self.state == StreamState::AlarmLocked {
            self.state = StreamState::Idle;
            return true;
        }
        false
    }

    /// Refine the window from a `Bf:` field.
    ///
    /// Only refined while the link is quiet: with bytes in flight the
    /// report races the acks and the reserved count would be double
    /// counted. Floor 64, cap 128 unless the firmware reports more.
    pub fn on_bf_report(&mut self, rx_avail: usize) {
        if self.in_flight > 0 || !self.pending.is_empty() || !self.preamble.is_empty() {
            return;
        }
        let capacity = rx_avail + self.in_flight;
        let cap = RX_BUFFER_SIZE.max(capacity);
        self.window = capacity.clamp(RX_WINDOW_FLOOR, cap);
    }

    /// Whether an immediate (manual/macro) line fits the window right now.
    pub fn can_fit_immediate(&self, byte_len: usize) -> bool {
        self.in_flight + byte_len <= self.window
    }

    /// Prepare the next stream dispatch (preamble first, then job lines).
    ///
    /// Returns `Ok(None)` when there is nothing to send or no window room;
    /// `Err` carries a validation failure on the candidate line. The core
    /// is not mutated until [`Self::commit`] runs.
    pub fn prepare_next(
        &mut self,
        get_line: impl Fn(usize) -> Option<String>,
    ) -> Result<Option<Prepared>, (Option<usize>, ValidationError)> {
        if self.state != StreamState::Running {
            return Ok(None);
        }

        if let Some(text) = self.preamble.front() {
            let text = text.clone();
            validate_wire_line(&text).map_err(|e| (None, e))?;
            let byte_len = text.len() + 1;
            if self.in_flight + byte_len > self.window {
                return Ok(None);
            }
            let mut payload = text.clone().into_bytes();
            payload.push(b'\n');
            return Ok(Some(Prepared {
                payload,
                entry: PendingEntry::immediate(LineClass::Job, text, byte_len),
                from_preamble: true,
            }));
        }

        loop {
            if let Some(barrier) = self.pause_barrier {
                if self.send_index > barrier {
                    return Ok(None);
                }
            }
            if self.send_index >= self.total {
                return Ok(None);
            }
            let index = self.send_index;
            let Some(raw) = get_line(index) else {
                return Ok(None);
            };
            let text = if self.dry_run {
                sanitize_dry_run(&raw)
            } else {
                raw.trim().to_string()
            };
            if text.is_empty() {
                // Nothing left to send for this line; count it done.
                self.send_index += 1;
                self.skipped += 1;
                continue;
            }
            validate_wire_line(&text).map_err(|e| (Some(index), e))?;
            let byte_len = text.len() + 1;
            if self.in_flight + byte_len > self.window {
                return Ok(None);
            }
            let pause = pause_word(&text).is_some();
            let mut payload = text.clone().into_bytes();
            payload.push(b'\n');
            return Ok(Some(Prepared {
                payload,
                entry: PendingEntry::job(index, text, byte_len, pause),
                from_preamble: false,
            }));
        }
    }

    /// Commit a prepared dispatch after the write succeeded.
    pub fn commit(&mut self, prepared: Prepared) {
        let entry = prepared.entry;
        if prepared.from_preamble {
            self.preamble.pop_front();
        } else if let Some(index) = entry.index {
            debug_assert_eq!(index, self.send_index);
            self.send_index = index + 1;
            if entry.pause_after_ack {
                self.pause_barrier = Some(index);
            }
        }
        self.in_flight += entry.byte_len;
        self.pending.push_back(entry);
    }

    /// Track an immediate (manual/macro) line the controller wrote.
    pub fn commit_immediate(&mut self, entry: PendingEntry) {
        self.in_flight += entry.byte_len;
        self.pending.push_back(entry);
    }

    /// Feed an `ok` acknowledgment.
    pub fn on_ok(&mut self) -> StreamEvent {
        let Some(entry) = self.pending.pop_front() else {
            return StreamEvent::None;
        };
        self.in_flight = self.in_flight.saturating_sub(entry.byte_len);

        let Some(index) = entry.index else {
            let completed = self.check_complete();
            return match completed {
                Some(event) => event,
                None => StreamEvent::ImmediateAcked { text: entry.text },
            };
        };

        self.acked += 1;
        if entry.pause_after_ack {
            self.pause_barrier = None;
            if self.state == StreamState::Running {
                self.state = StreamState::Paused;
            }
            let word = pause_word(&entry.text).unwrap_or("M0").to_string();
            return StreamEvent::AutoPaused { index, word };
        }
        if let Some(event) = self.check_complete() {
            return event;
        }
        StreamEvent::Acked {
            index,
            done: self.done(),
            total: self.total,
        }
    }

    fn check_complete(&mut self) -> Option<StreamEvent> {
        if self.state == StreamState::Running
            && self.pending.is_empty()
            && self.preamble.is_empty()
            && self.send_index >= self.total
        {
            self.state = StreamState::Idle;
            self.resume_default = None;
            return Some(StreamEvent::Completed);
        }
        None
    }

    /// Feed an `error:N` acknowledgment.
    pub fn on_error(&mut self, code: u8, annotated: &str) -> StreamEvent {
        let entry = self.pending.pop_front();
        if let Some(ref e) = entry {
            self.in_flight = self.in_flight.saturating_sub(e.byte_len);
        }

        if self.is_streaming() {
            let (line_index, line_text) = match &entry {
                Some(e) => (e.index, Some(e.text.clone())),
                None => (None, None),
            };
            if line_index.is_some() && line_index == self.pause_barrier {
                self.pause_barrier = None;
            }
            // The controller discards the rest; GRBL never saw complete
            // context for them anyway.
            self.pending.clear();
            self.in_flight = 0;
            self.state = StreamState::Errored;
            self.resume_default = line_index;
            let info = StreamErrorInfo {
                code,
                line_index,
                line_text,
                message: annotated.to_string(),
            };
            self.last_error = Some(info.clone());
            return StreamEvent::Errored(info);
        }

        StreamEvent::ImmediateErrored {
            code,
            text: entry.map(|e| e.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    fn run_core(lines: &[&str]) -> (StreamCore, Vec<String>) {
        let lines = job(lines);
        let mut core = StreamCore::new();
        core.arm(lines.len());
        core.run();
        (core, lines)
    }

    fn dispatch_all(core: &mut StreamCore, lines: &[String]) -> Vec<String> {
        let mut sent = Vec::new();
        while let Ok(Some(p)) = core.prepare_next(|i| lines.get(i).cloned()) {
            sent.push(p.entry.text.clone());
            core.commit(p);
        }
        sent
    }

    #[test]
    fn window_limits_dispatch() {
        let long_a = "G1X0.123456Y9.876543F1200";
        let lines: Vec<String> = (0..20).map(|_| long_a.to_string()).collect();
        let mut core = StreamCore::new();
        core.arm(lines.len());
        core.run();
        let sent = dispatch_all(&mut core, &lines);
        assert!(core.in_flight() <= core.window());
        assert_eq!(sent.len(), core.pending_len());
        assert!(sent.len() < lines.len());
        // Acks free window space for more dispatch.
        core.on_ok();
        let more = dispatch_all(&mut core, &lines);
        assert_eq!(more.len(), 1);
        assert!(core.in_flight() <= core.window());
    }

    #[test]
    fn completes_when_all_acked() {
        let (mut core, lines) = run_core(&["G21", "G90", "G1X1"]);
        dispatch_all(&mut core, &lines);
        assert!(matches!(core.on_ok(), StreamEvent::Acked { index: 0, .. }));
        assert!(matches!(core.on_ok(), StreamEvent::Acked { index: 1, .. }));
        assert!(matches!(core.on_ok(), StreamEvent::Completed));
        assert_eq!(core.state(), StreamState::Idle);
        assert_eq!(core.in_flight(), 0);
    }

    #[test]
    fn error_latches_and_drains() {
        let (mut core, lines) = run_core(&["G21", "G1X1", "G1X2"]);
        dispatch_all(&mut core, &lines);
        core.on_ok();
        let event = core.on_error(20, "error:20 (Unsupported command)");
        match event {
            StreamEvent::Errored(info) => {
                assert_eq!(info.code, 20);
                assert_eq!(info.line_index, Some(1));
                assert_eq!(info.line_text.as_deref(), Some("G1X1"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(core.state(), StreamState::Errored);
        assert_eq!(core.pending_len(), 0);
        assert_eq!(core.in_flight(), 0);
        assert_eq!(core.resume_default(), Some(1));
        // No further dispatch until cleared.
        assert!(core
            .prepare_next(|i| lines.get(i).cloned())
            .unwrap()
            .is_none());
    }

    #[test]
    fn auto_pause_on_m0_ack() {
        let (mut core, lines) = run_core(&["G1X1", "M0", "G1X2"]);
        let sent = dispatch_all(&mut core, &lines);
        // Dispatch stops after the M0 barrier.
        assert_eq!(sent, ["G1X1", "M0"]);
        assert!(matches!(core.on_ok(), StreamEvent::Acked { index: 0, .. }));
        match core.on_ok() {
            StreamEvent::AutoPaused { index, word } => {
                assert_eq!(index, 1);
                assert_eq!(word, "M0");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(core.state(), StreamState::Paused);
        // Resume releases the barrier.
        assert!(core.resume());
        let more = dispatch_all(&mut core, &lines);
        assert_eq!(more, ["G1X2"]);
        assert!(matches!(core.on_ok(), StreamEvent::Completed));
    }

    #[test]
    fn pause_word_requires_leading_position() {
        assert_eq!(pause_word("M0"), Some("M0"));
        assert_eq!(pause_word("M06"), Some("M6"));
        assert_eq!(pause_word("M1 X5"), Some("M1"));
        assert_eq!(pause_word("G1 X5 M0"), None);
        assert_eq!(pause_word("M30"), None);
    }

    #[test]
    fn alarm_locks_and_clears() {
        let (mut core, lines) = run_core(&["G1X1", "G1X2"]);
        dispatch_all(&mut core, &lines);
        core.alarm();
        assert_eq!(core.state(), StreamState::AlarmLocked);
        assert_eq!(core.pending_len(), 0);
        assert_eq!(core.in_flight(), 0);
        assert!(core.alarm_cleared());
        assert_eq!(core.state(), StreamState::Idle);
    }

    #[test]
    fn bf_report_refines_only_when_quiet() {
        let mut core = StreamCore::new();
        core.on_bf_report(200);
        assert_eq!(core.window(), 200);
        core.on_bf_report(100);
        assert_eq!(core.window(), 100);
        core.on_bf_report(10);
        assert_eq!(core.window(), RX_WINDOW_FLOOR);

        core.arm(1);
        core.run();
        let lines = vec!["G1X1".to_string()];
        dispatch_all(&mut core, &lines);
        let before = core.window();
        core.on_bf_report(500);
        assert_eq!(core.window(), before);
    }

    #[test]
    fn resume_preamble_streams_first() {
        let lines = job(&["G21", "G90", "G1X1", "G1X2"]);
        let mut core = StreamCore::new();
        core.arm(lines.len());
        core.run_from(3, vec!["G21".into(), "G90".into(), "F800".into()]);
        let sent = dispatch_all(&mut core, &lines);
        assert_eq!(sent, ["G21", "G90", "F800", "G1X2"]);
        core.on_ok();
        core.on_ok();
        core.on_ok();
        assert!(matches!(core.on_ok(), StreamEvent::Completed));
    }

    #[test]
    fn stop_keeps_resume_default() {
        let (mut core, lines) = run_core(&["G1X1", "G1X2", "G1X3"]);
        dispatch_all(&mut core, &lines);
        core.begin_stop();
        assert_eq!(core.state(), StreamState::Stopping);
        core.finish_stop();
        assert_eq!(core.state(), StreamState::Idle);
        assert_eq!(core.resume_default(), Some(2));
    }

    #[test]
    fn dry_run_strips_spindle_words() {
        assert_eq!(sanitize_dry_run("M3 S12000"), "");
        assert_eq!(sanitize_dry_run("G1 X5 F500 S8000"), "G1X5F500");
        assert_eq!(sanitize_dry_run("M30"), "M30");
    }

    #[test]
    fn send_time_validation_rejects_overlong() {
        let long = "G1".to_string() + &"X1".repeat(45);
        assert!(matches!(
            validate_wire_line(&long),
            Err(ValidationError::LineTooLong { .. })
        ));
        assert!(matches!(
            validate_wire_line("G1 Xü"),
            Err(ValidationError::NonAsciiLine { .. })
        ));
        assert!(validate_wire_line("G1 X5").is_ok());
    }
}
