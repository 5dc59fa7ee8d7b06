//! The GRBL streaming controller.
//!
//! Owns the communicator, the stream core, the status tracker, and the
//! manual queue. Worker threads (RX, TX, status poll) are thin loops over
//! the pump methods so tests can drive the same paths deterministically
//! against a mock link.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use simplesender_core::constants::{
    DEFAULT_SPINDLE_RPM, RT_HOLD, RT_JOG_CANCEL, RT_RESET, RT_RESUME, RT_STATUS,
    STATUS_FAILURE_LIMIT, STATUS_POLL_DEFAULT, WATCHDOG_DISCONNECT_TIMEOUT, WATCHDOG_RX_TIMEOUT,
};
use simplesender_core::types::{Axis, LineClass, ModalSnapshot, PendingEntry, StopMode, StreamState};
use simplesender_core::{
    annotate_alarm, annotate_error, Error, GateError, MachineState, ProtocolError, Result,
};
use simplesender_gcode::source::Job;

use crate::communication::framing::LineFramer;
use crate::communication::{Communicator, ConnectionParams};
use crate::gate::CommandGate;
use crate::grbl::response::{is_reset_feedback, parse_response, GrblResponse};
use crate::grbl::status::{StatusReport, StatusTracker};
use crate::grbl::stream::{StreamCore, StreamErrorInfo, StreamEvent};

/// Worker loop idle delay.
const LOOP_DELAY: Duration = Duration::from_millis(10);

/// Events pushed to the UI/event channel.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// Link opened.
    Connected {
        /// Port name.
        port: String,
    },
    /// Link closed; `reason` set for unexpected closes.
    Disconnected {
        /// Close reason, `None` for user disconnects.
        reason: Option<String>,
    },
    /// Handshake readiness changed.
    Ready(bool),
    /// Raw inbound record (already annotated).
    RxLine(String),
    /// Outbound manual/macro line.
    TxLine(String),
    /// Stream state transition.
    StreamState(StreamState),
    /// Job progress.
    Progress {
        /// Completed lines.
        done: usize,
        /// Total lines.
        total: usize,
    },
    /// A job line went out.
    LineSent {
        /// Zero-based job line index.
        index: usize,
    },
    /// A job line was acknowledged.
    LineAcked {
        /// Zero-based job line index.
        index: usize,
    },
    /// RX window utilization.
    BufferFill {
        /// Bytes in flight.
        used: usize,
        /// Current window.
        window: usize,
    },
    /// The stream paused on a directive or operator action.
    PauseReason(String),
    /// GRBL rejected a job line.
    StreamError {
        /// Annotated message.
        message: String,
        /// Zero-based job line index.
        index: Option<usize>,
        /// The errored line text.
        text: Option<String>,
        /// Job name.
        job: Option<String>,
    },
    /// GRBL rejected a manual/macro line, or validation did.
    ManualError {
        /// Annotated message.
        message: String,
        /// Send source label.
        source: Option<String>,
    },
    /// Alarm raised.
    Alarm {
        /// Annotated alarm message.
        message: String,
    },
    /// Parsed status report (merged view).
    Status(StatusReport),
    /// Informational console line.
    Log(String),
}

#[derive(Debug)]
struct ManualSend {
    text: String,
    class: LineClass,
    source: Option<String>,
}

struct Shared {
    comm: Mutex<Box<dyn Communicator>>,
    core: Mutex<StreamCore>,
    job: Mutex<Option<Arc<Job>>>,
    tracker: Mutex<StatusTracker>,
    framer: Mutex<LineFramer>,
    manual_q: Mutex<VecDeque<ManualSend>>,
    events: Sender<ControllerEvent>,
    gate: CommandGate,
    ready: AtomicBool,
    user_disconnected: AtomicBool,
    stop_workers: AtomicBool,
    purge_jogs: AtomicBool,
    last_rx: Mutex<Instant>,
    watchdog_grace_until: Mutex<Option<Instant>>,
    watchdog_paused: AtomicBool,
    status_interval: Mutex<Duration>,
    status_failures: AtomicU32,
    stop_mode: Mutex<StopMode>,
    last_manual_source: Mutex<Option<String>>,
    parser_state: Mutex<Option<ModalSnapshot>>,
    parser_seq: AtomicU64,
}

/// Handle to the streaming controller; clones share one instance.
#[derive(Clone)]
pub struct GrblController {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl GrblController {
    /// Create a controller over a communicator.
    ///
    /// Returns the receiving end of the event channel.
    pub fn new(comm: Box<dyn Communicator>) -> (Self, Receiver<ControllerEvent>) {
        let (tx, rx) = mpsc::channel();
        let shared = Shared {
            comm: Mutex::new(comm),
            core: Mutex::new(StreamCore::new()),
            job: Mutex::new(None),
            tracker: Mutex::new(StatusTracker::new()),
            framer: Mutex::new(LineFramer::new()),
            manual_q: Mutex::new(VecDeque::new()),
            events: tx,
            gate: CommandGate::new(),
            ready: AtomicBool::new(false),
            user_disconnected: AtomicBool::new(false),
            stop_workers: AtomicBool::new(false),
            purge_jogs: AtomicBool::new(false),
            last_rx: Mutex::new(Instant::now()),
            watchdog_grace_until: Mutex::new(None),
            watchdog_paused: AtomicBool::new(false),
            status_interval: Mutex::new(STATUS_POLL_DEFAULT),
            status_failures: AtomicU32::new(0),
            stop_mode: Mutex::new(StopMode::default()),
            last_manual_source: Mutex::new(None),
            parser_state: Mutex::new(None),
            parser_seq: AtomicU64::new(0),
        };
        (
            Self {
                shared: Arc::new(shared),
                workers: Arc::new(Mutex::new(Vec::new())),
            },
            rx,
        )
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.shared.events.send(event);
    }

    /// The command gate shared with the macro executor.
    pub fn gate(&self) -> &CommandGate {
        &self.shared.gate
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Open the link and start the worker threads.
    pub fn open(&self, params: &ConnectionParams) -> Result<()> {
        {
            let mut comm = self.shared.comm.lock();
            if comm.is_connected() {
                comm.disconnect()?;
            }
            comm.connect(params)?;
        }
        self.shared.user_disconnected.store(false, Ordering::SeqCst);
        self.shared.stop_workers.store(false, Ordering::SeqCst);
        self.shared.ready.store(false, Ordering::SeqCst);
        self.shared.status_failures.store(0, Ordering::SeqCst);
        *self.shared.last_rx.lock() = Instant::now();
        self.shared.framer.lock().clear();
        self.shared.core.lock().reset();
        self.start_workers();
        self.emit(ControllerEvent::Connected {
            port: params.port.clone(),
        });
        tracing::info!("Connected to {} at {} baud", params.port, params.baud_rate);
        Ok(())
    }

    /// Close the link on user request.
    pub fn close(&self) {
        self.shared.user_disconnected.store(true, Ordering::SeqCst);
        self.shutdown_link(None);
    }

    /// True while the link is open.
    pub fn is_connected(&self) -> bool {
        self.shared.comm.lock().is_connected()
    }

    /// True when the user closed the link (suppresses auto-reconnect).
    pub fn user_disconnected(&self) -> bool {
        self.shared.user_disconnected.load(Ordering::SeqCst)
    }

    /// True once the banner or first status arrived.
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    fn start_workers(&self) {
        let mut workers = self.workers.lock();
        let rx_ctl = self.clone();
        workers.push(std::thread::Builder::new()
            .name("grbl-rx".into())
            .spawn(move || {
                while !rx_ctl.shared.stop_workers.load(Ordering::SeqCst) {
                    if !rx_ctl.is_connected() {
                        std::thread::sleep(Duration::from_millis(50));
                        continue;
                    }
                    if !rx_ctl.pump_rx_once() {
                        std::thread::sleep(LOOP_DELAY);
                    }
                }
                tracing::debug!("RX worker stopped");
            })
            .expect("spawn rx worker"));

        let tx_ctl = self.clone();
        workers.push(std::thread::Builder::new()
            .name("grbl-tx".into())
            .spawn(move || {
                while !tx_ctl.shared.stop_workers.load(Ordering::SeqCst) {
                    if tx_ctl.is_connected() {
                        tx_ctl.pump_tx_once();
                    }
                    std::thread::sleep(LOOP_DELAY);
                }
                tracing::debug!("TX worker stopped");
            })
            .expect("spawn tx worker"));

        let st_ctl = self.clone();
        workers.push(std::thread::Builder::new()
            .name("grbl-status".into())
            .spawn(move || {
                while !st_ctl.shared.stop_workers.load(Ordering::SeqCst) {
                    if st_ctl.is_connected() {
                        st_ctl.pump_status_once();
                    }
                    let interval = *st_ctl.shared.status_interval.lock();
                    std::thread::sleep(interval);
                }
                tracing::debug!("Status worker stopped");
            })
            .expect("spawn status worker"));
    }

    fn shutdown_link(&self, reason: Option<String>) {
        if self.shared.stop_workers.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut comm = self.shared.comm.lock();
            let _ = comm.disconnect();
        }
        self.shared.ready.store(false, Ordering::SeqCst);
        self.shared.core.lock().reset();
        self.shared.manual_q.lock().clear();
        self.shared.framer.lock().clear();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        let me = std::thread::current().id();
        for handle in workers {
            if me == handle.thread().id() {
                continue;
            }
            // Workers exit on the stop flag; give them a bounded window
            // rather than risking a mutual join between two workers.
            let deadline = Instant::now() + Duration::from_millis(500);
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                tracing::warn!("Worker thread did not terminate in time");
            }
        }
        self.emit(ControllerEvent::Ready(false));
        self.emit(ControllerEvent::StreamState(StreamState::Idle));
        self.emit(ControllerEvent::Disconnected {
            reason: reason.clone(),
        });
        if let Some(reason) = reason {
            tracing::warn!("Disconnected: {}", reason);
        } else {
            tracing::info!("Serial port closed");
        }
    }

    fn handle_unexpected_close(&self, reason: String) {
        if !self.is_connected() && self.shared.stop_workers.load(Ordering::SeqCst) {
            return;
        }
        self.emit(ControllerEvent::Log(format!("[disconnect] {}", reason)));
        self.shutdown_link(Some(reason));
    }

    // ------------------------------------------------------------------
    // Job control
    // ------------------------------------------------------------------

    /// Arm a processed job for streaming.
    pub fn load_job(&self, job: Job) -> Result<()> {
        let mut core = self.shared.core.lock();
        if core.is_streaming() {
            return Err(GateError::BlockedByStreaming.into());
        }
        let total = job.len();
        *self.shared.job.lock() = Some(Arc::new(job));
        core.arm(total);
        drop(core);
        self.emit(ControllerEvent::StreamState(StreamState::Armed));
        tracing::info!("Loaded {} lines of G-code", total);
        Ok(())
    }

    /// Start streaming from line zero.
    pub fn start_stream(&self) -> Result<()> {
        let mut core = self.shared.core.lock();
        self.shared
            .gate
            .check_stream_start(self.is_connected(), core.state())?;
        if core.state() != StreamState::Armed {
            let total = self.shared.job.lock().as_ref().map(|j| j.len());
            let Some(total) = total else {
                return Err(Error::other("No G-code loaded"));
            };
            core.arm(total);
        }
        core.run();
        drop(core);
        self.emit(ControllerEvent::StreamState(StreamState::Running));
        tracing::info!("Started G-code streaming");
        Ok(())
    }

    /// Resume streaming at `start_index` after sending `preamble`.
    pub fn start_stream_from(&self, start_index: usize, preamble: Vec<String>) -> Result<()> {
        let mut core = self.shared.core.lock();
        self.shared
            .gate
            .check_stream_start(self.is_connected(), core.state())?;
        let total = self.shared.job.lock().as_ref().map(|j| j.len());
        let Some(total) = total else {
            return Err(Error::other("No G-code loaded"));
        };
        core.arm(total);
        core.run_from(start_index, preamble);
        let done = core.done();
        drop(core);
        self.emit(ControllerEvent::Progress { done, total });
        self.emit(ControllerEvent::StreamState(StreamState::Running));
        tracing::info!("Resumed streaming from line {}", start_index + 1);
        Ok(())
    }

    /// Feed hold: pause the stream.
    pub fn pause_stream(&self) -> Result<()> {
        self.write_realtime(RT_HOLD)?;
        if self.shared.core.lock().pause() {
            self.emit(ControllerEvent::StreamState(StreamState::Paused));
            tracing::info!("Stream paused");
        }
        Ok(())
    }

    /// Cycle start: resume the stream.
    pub fn resume_stream(&self) -> Result<()> {
        self.write_realtime(RT_RESUME)?;
        if self.shared.core.lock().resume() {
            self.emit(ControllerEvent::StreamState(StreamState::Running));
            tracing::info!("Stream resumed");
        }
        Ok(())
    }

    /// Stop per the configured [`StopMode`].
    ///
    /// Jog cancel goes out before the soft reset so an in-flight jog
    /// decelerates under jog rules instead of being chopped by the reset.
    pub fn stop_stream(&self) -> Result<()> {
        let mode = *self.shared.stop_mode.lock();
        self.shared.core.lock().begin_stop();
        if mode == StopMode::FlushThenReset {
            self.shared.manual_q.lock().clear();
        }
        let _ = self.write_realtime(RT_JOG_CANCEL);
        self.write_realtime(RT_RESET)?;
        {
            let mut core = self.shared.core.lock();
            core.finish_stop();
        }
        self.shared.manual_q.lock().clear();
        self.shared.ready.store(false, Ordering::SeqCst);
        self.emit_buffer_fill();
        self.emit(ControllerEvent::StreamState(StreamState::Idle));
        tracing::info!("Stream stopped");
        Ok(())
    }

    /// Soft reset outside of streaming.
    pub fn reset(&self) -> Result<()> {
        self.write_realtime(RT_RESET)?;
        self.shared.core.lock().reset();
        self.shared.manual_q.lock().clear();
        self.shared.ready.store(false, Ordering::SeqCst);
        self.emit_buffer_fill();
        self.emit(ControllerEvent::StreamState(StreamState::Idle));
        Ok(())
    }

    /// Operator acknowledged the latched stream error.
    pub fn clear_stream_error(&self) {
        self.shared.core.lock().clear_error();
        self.emit(ControllerEvent::StreamState(StreamState::Idle));
    }

    /// Default Resume-From target (zero-based), if any.
    pub fn resume_default(&self) -> Option<usize> {
        self.shared.core.lock().resume_default()
    }

    /// Latched last stream error.
    pub fn last_stream_error(&self) -> Option<StreamErrorInfo> {
        self.shared.core.lock().last_error().cloned()
    }

    /// Current stream state.
    pub fn stream_state(&self) -> StreamState {
        self.shared.core.lock().state()
    }

    /// True while a job is running or paused.
    pub fn is_streaming(&self) -> bool {
        self.shared.core.lock().is_streaming()
    }

    /// Unacked outbound lines.
    pub fn pending_count(&self) -> usize {
        self.shared.core.lock().pending_len()
    }

    /// Current RX window estimate in bytes.
    pub fn rx_window(&self) -> usize {
        self.shared.core.lock().window()
    }

    /// Unacked bytes currently counted against the window.
    pub fn rx_in_flight(&self) -> usize {
        self.shared.core.lock().in_flight()
    }

    /// Enable/disable dry-run sanitize for job lines.
    pub fn set_dry_run(&self, enabled: bool) {
        self.shared.core.lock().set_dry_run(enabled);
        if enabled {
            self.emit(ControllerEvent::Log(
                "[dry run] Spindle/coolant/tool changes removed while streaming.".into(),
            ));
        }
    }

    /// Configure the all-stop behavior.
    pub fn set_stop_mode(&self, mode: StopMode) {
        *self.shared.stop_mode.lock() = mode;
    }

    /// Set the status poll interval.
    pub fn set_status_interval(&self, interval: Duration) {
        *self.shared.status_interval.lock() = interval.max(Duration::from_millis(10));
    }

    // ------------------------------------------------------------------
    // Manual and real-time sends
    // ------------------------------------------------------------------

    /// Queue a manual line (console, UI button).
    pub fn send_manual(&self, line: &str, source: Option<&str>) -> Result<()> {
        self.enqueue_line(line, LineClass::Manual, source)
    }

    /// Queue a line on behalf of the macro executor.
    pub fn send_macro_line(&self, line: &str) -> Result<()> {
        self.enqueue_line(line, LineClass::Macro, Some("macro"))
    }

    fn enqueue_line(&self, line: &str, class: LineClass, source: Option<&str>) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let state = self.shared.core.lock().state();
        self.shared
            .gate
            .check_line(self.is_connected(), state, line)?;
        if let Err(e) = crate::grbl::stream::validate_wire_line(line) {
            self.emit(ControllerEvent::ManualError {
                message: e.to_string(),
                source: source.map(|s| s.to_string()),
            });
            return Err(e.into());
        }
        *self.shared.last_manual_source.lock() = source.map(|s| s.to_string());
        self.shared.manual_q.lock().push_back(ManualSend {
            text: line.to_string(),
            class,
            source: source.map(|s| s.to_string()),
        });
        Ok(())
    }

    /// Send a real-time byte, bypassing the queue and the RX window.
    pub fn send_realtime(&self, byte: u8) -> Result<()> {
        let state = self.shared.core.lock().state();
        self.shared
            .gate
            .check_realtime(self.is_connected(), state, byte)?;
        self.write_realtime(byte)
    }

    fn write_realtime(&self, byte: u8) -> Result<()> {
        let mut comm = self.shared.comm.lock();
        if !comm.is_connected() {
            return Err(ProtocolError::NotConnected.into());
        }
        match comm.send(&[byte]) {
            Ok(_) => Ok(()),
            Err(e) => {
                drop(comm);
                self.handle_unexpected_close(format!("realtime write failed: {}", e));
                Err(e)
            }
        }
    }

    /// Unlock ($X) to clear an alarm.
    pub fn unlock(&self) -> Result<()> {
        self.send_manual("$X", Some("unlock"))
    }

    /// Run the homing cycle ($H); suspends the watchdog meanwhile.
    pub fn home(&self) -> Result<()> {
        self.suspend_watchdog(Duration::from_secs(60));
        self.send_manual("$H", Some("home"))
    }

    /// Spindle on at the given RPM.
    pub fn spindle_on(&self, rpm: Option<u32>) -> Result<()> {
        let rpm = rpm.unwrap_or(DEFAULT_SPINDLE_RPM);
        self.send_manual(&format!("M3 S{}", rpm), Some("spindle"))
    }

    /// Spindle off.
    pub fn spindle_off(&self) -> Result<()> {
        self.send_manual("M5", Some("spindle"))
    }

    /// Zero the work coordinates on the given axes (`G92 X0 ...`).
    pub fn zero_axes(&self, axes: &[Axis]) -> Result<()> {
        if axes.is_empty() {
            return Ok(());
        }
        let mut cmd = String::from("G92");
        for axis in axes {
            cmd.push(' ');
            cmd.push(axis.letter());
            cmd.push('0');
        }
        self.send_manual(&cmd, Some("zero"))
    }

    /// Queue an incremental jog.
    pub fn jog(&self, dx: f64, dy: f64, dz: f64, feed: f64, metric: bool) -> Result<()> {
        if feed <= 0.0 {
            return Err(Error::other(format!("Feed rate must be positive, got {}", feed)));
        }
        let unit = if metric { "G21" } else { "G20" };
        let cmd = format!("$J={} G91 X{:.4} Y{:.4} Z{:.4} F{:.1}", unit, dx, dy, dz, feed);
        self.send_manual(&cmd, Some("jog"))
    }

    /// Cancel the active jog (real-time).
    pub fn jog_cancel(&self) -> Result<()> {
        self.send_realtime(RT_JOG_CANCEL)
    }

    /// Drop queued-but-unsent `$J=` commands.
    pub fn cancel_pending_jogs(&self) {
        self.shared.purge_jogs.store(true, Ordering::SeqCst);
    }

    /// Block until manual/macro sends drained, up to `timeout`.
    pub fn wait_for_manual_completion(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        loop {
            let queued = !self.shared.manual_q.lock().is_empty();
            let pending = self.shared.core.lock().pending_len() > 0;
            if !queued && !pending {
                return true;
            }
            if start.elapsed() > timeout {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    // ------------------------------------------------------------------
    // Status access
    // ------------------------------------------------------------------

    /// Machine state from the last status report.
    pub fn machine_state(&self) -> Option<MachineState> {
        self.shared.tracker.lock().state()
    }

    /// Status freshness stamp.
    pub fn status_revision(&self) -> u64 {
        self.shared.tracker.lock().revision()
    }

    /// Last merged status report.
    pub fn last_status(&self) -> Option<StatusReport> {
        self.shared.tracker.lock().last().cloned()
    }

    /// Last `$G` parser state and its sequence number.
    pub fn parser_state(&self) -> (Option<ModalSnapshot>, u64) {
        (
            self.shared.parser_state.lock().clone(),
            self.shared.parser_seq.load(Ordering::SeqCst),
        )
    }

    /// Suspend connection-loss detection for `grace` (homing etc).
    pub fn suspend_watchdog(&self, grace: Duration) {
        let until = Instant::now() + grace;
        let mut slot = self.shared.watchdog_grace_until.lock();
        if slot.map(|t| t < until).unwrap_or(true) {
            *slot = Some(until);
        }
    }

    // ------------------------------------------------------------------
    // Pumps (worker bodies; also driven directly by tests)
    // ------------------------------------------------------------------

    /// Read and process available inbound bytes. Returns true when any
    /// records were handled.
    pub fn pump_rx_once(&self) -> bool {
        let chunk = {
            let mut comm = self.shared.comm.lock();
            if !comm.is_connected() {
                return false;
            }
            match comm.receive() {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(comm);
                    self.handle_unexpected_close(format!("serial read error: {}", e));
                    return false;
                }
            }
        };
        if chunk.is_empty() {
            return false;
        }
        let records = self.shared.framer.lock().push(&chunk);
        let handled = !records.is_empty();
        for record in records {
            self.handle_record(&record);
        }
        handled
    }

    fn handle_record(&self, line: &str) {
        *self.shared.last_rx.lock() = Instant::now();
        self.shared.watchdog_paused.store(false, Ordering::SeqCst);

        let Some(response) = parse_response(line) else {
            return;
        };
        match response {
            GrblResponse::Ok => {
                self.emit(ControllerEvent::RxLine("ok".into()));
                let event = self.shared.core.lock().on_ok();
                self.dispatch_stream_event(event);
            }
            GrblResponse::Error(code) => {
                let annotated = annotate_error(line);
                self.emit(ControllerEvent::RxLine(annotated.clone()));
                tracing::error!("GRBL error: {}", annotated);
                let event = self.shared.core.lock().on_error(code, &annotated);
                self.dispatch_stream_event(event);
            }
            GrblResponse::Alarm(_) => {
                self.handle_alarm(annotate_alarm(line));
            }
            GrblResponse::Status(report) => {
                self.handle_status(line, report);
            }
            GrblResponse::Banner { version } => {
                self.emit(ControllerEvent::RxLine(line.to_string()));
                tracing::info!("GRBL banner: {}", version);
                self.mark_ready();
            }
            GrblResponse::ParserState(snapshot) => {
                self.emit(ControllerEvent::RxLine(line.to_string()));
                *self.shared.parser_state.lock() = Some(snapshot);
                self.shared.parser_seq.fetch_add(1, Ordering::SeqCst);
            }
            GrblResponse::Feedback(_) => {
                self.emit(ControllerEvent::RxLine(line.to_string()));
                if is_reset_feedback(line) {
                    self.handle_alarm(line.to_string());
                }
            }
            GrblResponse::Setting { .. } | GrblResponse::Message(_) => {
                self.emit(ControllerEvent::RxLine(line.to_string()));
            }
        }
    }

    fn dispatch_stream_event(&self, event: StreamEvent) {
        match event {
            StreamEvent::None => {}
            StreamEvent::Acked { index, done, total } => {
                self.emit(ControllerEvent::LineAcked { index });
                self.emit(ControllerEvent::Progress { done, total });
            }
            StreamEvent::ImmediateAcked { text } => {
                self.emit(ControllerEvent::Log(format!("<< ok ({})", text)));
            }
            StreamEvent::AutoPaused { index, word } => {
                self.emit(ControllerEvent::LineAcked { index });
                self.emit(ControllerEvent::StreamState(StreamState::Paused));
                self.emit(ControllerEvent::PauseReason(word.clone()));
                self.emit(ControllerEvent::Log(format!(
                    "[stream] Paused on {} at line {}",
                    word,
                    index + 1
                )));
                tracing::info!("Stream paused ({})", word);
            }
            StreamEvent::Completed => {
                let total = self.shared.job.lock().as_ref().map(|j| j.len()).unwrap_or(0);
                self.emit(ControllerEvent::Progress { done: total, total });
                self.emit(ControllerEvent::StreamState(StreamState::Idle));
                tracing::info!("Streaming complete");
            }
            StreamEvent::Errored(info) => {
                // Hold motion at the planned stop; the operator decides
                // whether to reset.
                let _ = self.write_realtime(RT_HOLD);
                let job_name = self.shared.job.lock().as_ref().and_then(|j| j.name.clone());
                let message = format_stream_error(&info, job_name.as_deref());
                self.emit(ControllerEvent::StreamState(StreamState::Errored));
                self.emit(ControllerEvent::StreamError {
                    message: message.clone(),
                    index: info.line_index,
                    text: info.line_text.clone(),
                    job: job_name,
                });
                self.emit(ControllerEvent::Log(format!("[stream error] {}", message)));
            }
            StreamEvent::ImmediateErrored { code, text } => {
                let source = self.shared.last_manual_source.lock().clone();
                let annotated = annotate_error(&format!("error:{}", code));
                let message = match text {
                    Some(text) => format!("{} | {}", annotated, text),
                    None => annotated,
                };
                self.emit(ControllerEvent::ManualError { message, source });
            }
        }
        self.emit_buffer_fill();
    }

    fn handle_status(&self, line: &str, report: StatusReport) {
        let merged = self.shared.tracker.lock().update(report);
        self.mark_ready();

        match merged.state {
            MachineState::Alarm => {
                let locked = self.shared.core.lock().state() == StreamState::AlarmLocked;
                if !locked {
                    self.handle_alarm("status report: Alarm".to_string());
                }
            }
            MachineState::Idle => {
                if self.shared.core.lock().alarm_cleared() {
                    self.emit(ControllerEvent::StreamState(StreamState::Idle));
                    self.emit(ControllerEvent::Log("[alarm] Cleared".into()));
                }
            }
            _ => {}
        }

        if let Some(rx_avail) = merged.rx_avail {
            self.shared.core.lock().on_bf_report(rx_avail as usize);
            self.emit_buffer_fill();
        }

        // Idle reports refresh state/DRO but stay out of the console.
        if merged.state != MachineState::Idle {
            self.emit(ControllerEvent::RxLine(line.to_string()));
        }
        self.emit(ControllerEvent::Status(merged));
    }

    fn handle_alarm(&self, message: String) {
        tracing::warn!("GRBL ALARM: {}", message);
        self.emit(ControllerEvent::Log(format!("[ALARM] {}", message)));
        {
            let mut core = self.shared.core.lock();
            core.alarm();
        }
        self.shared.manual_q.lock().clear();
        self.emit_buffer_fill();
        self.emit(ControllerEvent::StreamState(StreamState::AlarmLocked));
        self.emit(ControllerEvent::Alarm { message });
    }

    fn mark_ready(&self) {
        if !self.shared.ready.swap(true, Ordering::SeqCst) {
            self.emit(ControllerEvent::Ready(true));
            tracing::info!("GRBL ready");
        }
    }

    fn emit_buffer_fill(&self) {
        let (used, window) = {
            let core = self.shared.core.lock();
            (core.in_flight(), core.window())
        };
        self.emit(ControllerEvent::BufferFill { used, window });
    }

    /// Dispatch stream lines and drain the manual queue. Returns true
    /// when anything was written.
    pub fn pump_tx_once(&self) -> bool {
        let mut wrote = false;
        wrote |= self.pump_stream_dispatch();
        wrote |= self.pump_manual_queue();
        wrote
    }

    fn pump_stream_dispatch(&self) -> bool {
        let job = self.shared.job.lock().clone();
        let Some(job) = job else {
            return false;
        };
        let mut wrote = false;
        loop {
            let prepared = {
                let mut core = self.shared.core.lock();
                match core.prepare_next(|i| job.get(i).map(|l| l.text)) {
                    Ok(p) => p,
                    Err((index, e)) => {
                        core.pause();
                        drop(core);
                        let _ = self.write_realtime(RT_HOLD);
                        let message = format!("{} (line {})", e, index.map(|i| i + 1).unwrap_or(0));
                        self.emit(ControllerEvent::StreamState(StreamState::Paused));
                        self.emit(ControllerEvent::StreamError {
                            message,
                            index,
                            text: None,
                            job: job.name.clone(),
                        });
                        return wrote;
                    }
                }
            };
            let Some(prepared) = prepared else {
                return wrote;
            };
            if !self.write_payload(&prepared.payload) {
                return wrote;
            }
            wrote = true;
            let index = prepared.entry.index;
            {
                let mut core = self.shared.core.lock();
                match core.state() {
                    StreamState::Running | StreamState::Paused => core.commit(prepared),
                    // Alarm/reset raced the write; bookkeeping was
                    // drained and the firmware dropped the line too.
                    _ => {}
                }
            }
            if let Some(index) = index {
                self.emit(ControllerEvent::LineSent { index });
            }
            self.emit_buffer_fill();
        }
    }

    fn pump_manual_queue(&self) -> bool {
        if self.shared.purge_jogs.swap(false, Ordering::SeqCst) {
            let mut q = self.shared.manual_q.lock();
            q.retain(|m| !m.text.trim_start().to_ascii_uppercase().starts_with("$J="));
        }
        let mut wrote = false;
        loop {
            let state = self.shared.core.lock().state();
            if matches!(
                state,
                StreamState::Running | StreamState::Paused | StreamState::Stopping
            ) {
                return wrote;
            }
            let next = {
                let mut q = self.shared.manual_q.lock();
                let Some(front) = q.front() else {
                    return wrote;
                };
                // The alarm may have landed after the enqueue check.
                if state == StreamState::AlarmLocked {
                    let upper = front.text.trim().to_ascii_uppercase();
                    if !(upper.starts_with("$X") || upper.starts_with("$H")) {
                        q.pop_front();
                        continue;
                    }
                }
                let byte_len = front.text.len() + 1;
                let (fits, droppable) = {
                    let core = self.shared.core.lock();
                    (
                        core.can_fit_immediate(byte_len),
                        core.pending_len() == 0 && byte_len > core.window(),
                    )
                };
                if !fits {
                    if droppable {
                        // Larger than the window can ever get; it would
                        // stall the queue forever.
                        let dropped = q.pop_front();
                        drop(q);
                        if let Some(dropped) = dropped {
                            self.emit(ControllerEvent::ManualError {
                                message: format!(
                                    "Line too long for buffer ({} bytes): {}",
                                    byte_len, dropped.text
                                ),
                                source: dropped.source,
                            });
                        }
                        continue;
                    }
                    return wrote;
                }
                q.pop_front().map(|m| (m, byte_len))
            };
            let Some((send, byte_len)) = next else {
                return wrote;
            };
            let mut payload = send.text.clone().into_bytes();
            payload.push(b'\n');
            if !self.write_payload(&payload) {
                // Keep it for the retry after reconnect.
                self.shared.manual_q.lock().push_front(send);
                return wrote;
            }
            wrote = true;
            *self.shared.last_manual_source.lock() = send.source.clone();
            self.shared
                .core
                .lock()
                .commit_immediate(PendingEntry::immediate(send.class, send.text.clone(), byte_len));
            self.emit(ControllerEvent::TxLine(send.text));
            self.emit_buffer_fill();
        }
    }

    fn write_payload(&self, payload: &[u8]) -> bool {
        let mut comm = self.shared.comm.lock();
        if !comm.is_connected() {
            return false;
        }
        match comm.send(payload) {
            Ok(_) => true,
            Err(e) => {
                drop(comm);
                self.handle_unexpected_close(format!("serial write error: {}", e));
                false
            }
        }
    }

    /// One status-poll tick: watchdog checks plus a `?` query.
    pub fn pump_status_once(&self) {
        let now = Instant::now();
        let grace = self
            .shared
            .watchdog_grace_until
            .lock()
            .map(|t| now < t)
            .unwrap_or(false);
        let idle_for = now.duration_since(*self.shared.last_rx.lock());

        if !grace && self.is_ready() {
            if idle_for >= WATCHDOG_DISCONNECT_TIMEOUT {
                self.handle_unexpected_close("connection watchdog timeout".into());
                return;
            }
            if idle_for >= WATCHDOG_RX_TIMEOUT
                && !self.shared.watchdog_paused.swap(true, Ordering::SeqCst)
            {
                let paused = self.shared.core.lock().pause();
                if paused {
                    let _ = self.write_realtime(RT_HOLD);
                    self.emit(ControllerEvent::StreamState(StreamState::Paused));
                    self.emit(ControllerEvent::PauseReason("connection watchdog".into()));
                    self.emit(ControllerEvent::Log(
                        "[watchdog] No RX from GRBL; pausing stream.".into(),
                    ));
                }
            }
        }

        match self.write_realtime_unguarded(RT_STATUS) {
            Ok(()) => {
                self.shared.status_failures.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                let failures = self.shared.status_failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.emit(ControllerEvent::Log(format!(
                    "[status] Query failed ({}/{}): {}",
                    failures, STATUS_FAILURE_LIMIT, e
                )));
                if failures >= STATUS_FAILURE_LIMIT {
                    self.handle_unexpected_close(format!("status query error: {}", e));
                }
            }
        }
    }

    /// Status queries skip the gate: `?` is always legal.
    fn write_realtime_unguarded(&self, byte: u8) -> Result<()> {
        let mut comm = self.shared.comm.lock();
        if !comm.is_connected() {
            return Err(ProtocolError::NotConnected.into());
        }
        comm.send(&[byte]).map(|_| ())
    }
}

fn format_stream_error(info: &StreamErrorInfo, job_name: Option<&str>) -> String {
    let mut parts = vec![info.message.clone()];
    if let Some(index) = info.line_index {
        match job_name {
            Some(name) => parts.push(format!("{} line {}", name, index + 1)),
            None => parts.push(format!("line {}", index + 1)),
        }
    }
    if let Some(text) = &info.line_text {
        parts.push(text.clone());
    }
    parts.join(" | ")
}

