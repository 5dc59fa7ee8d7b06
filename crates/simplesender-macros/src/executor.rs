//! Macro execution against the machine.
//!
//! The executor owns the protocol obligations of a macro run: it takes
//! the command gate, snapshots modal state through `$G`, forces metric
//! units, sends each line and waits for its ack plus an Idle status
//! sample, services `%wait`/`%update` by watching the status freshness
//! stamp, and restores state afterwards.

use std::time::{Duration, Instant};

use simplesender_communication::{CommandGate, GrblController};
use simplesender_core::constants::{MACRO_WAIT_POLL, MACRO_WAIT_TIMEOUT, RT_STATUS};
use simplesender_core::types::{MachineState, ModalSnapshot, StreamState};
use simplesender_core::{Error, MacroError, Result};
use simplesender_gcode::resume::preamble_lines;

use crate::directives::{compile_program, eval_cond, render_line, Op};
use crate::files::{MacroFile, HEADER_LINES};
use crate::script::{eval, MacroVars, Value};

/// The controller surface the executor needs.
///
/// [`GrblController`] implements it; tests drive the executor with a
/// scripted fake.
pub trait MachineSession {
    /// Link open?
    fn is_connected(&self) -> bool;
    /// Current stream state (gate checks, alarm aborts).
    fn stream_state(&self) -> StreamState;
    /// Queue one line for sending.
    fn send_line(&self, line: &str) -> Result<()>;
    /// Wait until queued sends are written and acked.
    fn wait_sends_drained(&self, timeout: Duration) -> bool;
    /// Machine state from the last status report.
    fn machine_state(&self) -> Option<MachineState>;
    /// Status freshness stamp.
    fn status_revision(&self) -> u64;
    /// Ask for a status report (`?`).
    fn request_status(&self) -> Result<()>;
    /// Last `$G` parser state with its sequence number.
    fn parser_state(&self) -> (Option<ModalSnapshot>, u64);
    /// Work position from the last status report.
    fn work_position(&self) -> Option<[f64; 3]>;
    /// Machine position from the last status report.
    fn machine_position(&self) -> Option<[f64; 3]>;
}

impl MachineSession for GrblController {
    fn is_connected(&self) -> bool {
        GrblController::is_connected(self)
    }

    fn stream_state(&self) -> StreamState {
        GrblController::stream_state(self)
    }

    fn send_line(&self, line: &str) -> Result<()> {
        self.send_macro_line(line)
    }

    fn wait_sends_drained(&self, timeout: Duration) -> bool {
        self.wait_for_manual_completion(timeout)
    }

    fn machine_state(&self) -> Option<MachineState> {
        GrblController::machine_state(self)
    }

    fn status_revision(&self) -> u64 {
        GrblController::status_revision(self)
    }

    fn request_status(&self) -> Result<()> {
        self.send_realtime(RT_STATUS)
    }

    fn parser_state(&self) -> (Option<ModalSnapshot>, u64) {
        GrblController::parser_state(self)
    }

    fn work_position(&self) -> Option<[f64; 3]> {
        self.last_status().and_then(|s| s.wpos)
    }

    fn machine_position(&self) -> Option<[f64; 3]> {
        self.last_status().and_then(|s| s.mpos)
    }
}

/// Executor tuning.
#[derive(Debug, Clone)]
pub struct MacroOptions {
    /// Allow expressions, assignments, and `%for`.
    pub scripting_enabled: bool,
    /// `%wait` / per-line idle timeout.
    pub wait_timeout: Duration,
    /// Poll interval while waiting.
    pub poll_interval: Duration,
}

impl Default for MacroOptions {
    fn default() -> Self {
        Self {
            scripting_enabled: false,
            wait_timeout: MACRO_WAIT_TIMEOUT,
            poll_interval: MACRO_WAIT_POLL,
        }
    }
}

/// Outcome of a macro run.
#[derive(Debug, Default)]
pub struct MacroRunReport {
    /// G-code lines actually sent.
    pub lines_sent: usize,
    /// `%msg` output in order.
    pub messages: Vec<String>,
    /// True when `%state_return` restored the full snapshot.
    pub state_restored: bool,
}

/// Runs macros against a [`MachineSession`] under the command gate.
pub struct MacroExecutor<S: MachineSession> {
    session: S,
    gate: CommandGate,
    options: MacroOptions,
}

struct RunCtx {
    vars: MacroVars,
    report: MacroRunReport,
    snapshot: ModalSnapshot,
    restored: bool,
    current_line: usize,
}

impl<S: MachineSession> MacroExecutor<S> {
    /// Create an executor.
    pub fn new(session: S, gate: CommandGate, options: MacroOptions) -> Self {
        Self {
            session,
            gate,
            options,
        }
    }

    /// The wrapped session.
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Run one macro file to completion.
    pub fn run(&self, macro_file: &MacroFile) -> Result<MacroRunReport> {
        let _permit = self
            .gate
            .begin_macro(self.session.is_connected(), self.session.stream_state())?;

        let ops = compile_program(
            &macro_file.body,
            HEADER_LINES + 1,
            self.options.scripting_enabled,
        )?;

        tracing::info!("Running macro '{}' ({} ops)", macro_file.label, ops.len());
        let snapshot = self.capture_snapshot()?;

        let mut ctx = RunCtx {
            vars: MacroVars::new(),
            report: MacroRunReport::default(),
            snapshot,
            restored: false,
            current_line: HEADER_LINES + 1,
        };
        self.refresh_vars(&mut ctx.vars);

        // Macros run in metric regardless of the job's units.
        self.send_and_settle("G21", &mut ctx)?;
        ctx.report.lines_sent = 0;

        let result = self.exec_ops(&ops, &mut ctx);
        let body_lines = ctx.report.lines_sent;

        // Units always go back to the snapshot even when the body failed;
        // a full restore only happens through %state_return.
        if !ctx.restored {
            if let Some(units) = ctx.snapshot.units.clone() {
                let _ = self.send_and_settle(&units, &mut ctx);
            }
        }
        ctx.report.lines_sent = body_lines;
        ctx.report.state_restored = ctx.restored;

        result.map(|_| ctx.report)
    }

    fn capture_snapshot(&self) -> Result<ModalSnapshot> {
        let (_, seq_before) = self.session.parser_state();
        let rev_before = self.session.status_revision();
        self.session.send_line("$G")?;
        if !self.session.wait_sends_drained(self.options.wait_timeout) {
            return Err(MacroError::Timeout.into());
        }
        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            let (snapshot, seq) = self.session.parser_state();
            if seq > seq_before {
                // A fresh status sample comes with the snapshot so the
                // state variables start accurate.
                self.session.request_status()?;
                let _ = self.wait_revision_advance(rev_before);
                return Ok(snapshot.unwrap_or_default());
            }
            if Instant::now() >= deadline {
                tracing::warn!("Modal snapshot failed; macro aborted");
                return Err(MacroError::Timeout.into());
            }
            std::thread::sleep(self.options.poll_interval);
        }
    }

    fn refresh_vars(&self, vars: &mut MacroVars) {
        let stream = self.session.stream_state();
        vars.set_bool("running", stream == StreamState::Running);
        vars.set_bool("paused", stream == StreamState::Paused);
        let state = self
            .session
            .machine_state()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        vars.set("state", Value::Str(state));
        if let Some(wpos) = self.session.work_position() {
            vars.set_number("wpos.x", wpos[0]);
            vars.set_number("wpos.y", wpos[1]);
            vars.set_number("wpos.z", wpos[2]);
        }
        if let Some(mpos) = self.session.machine_position() {
            vars.set_number("mpos.x", mpos[0]);
            vars.set_number("mpos.y", mpos[1]);
            vars.set_number("mpos.z", mpos[2]);
        }
    }

    fn check_alarm(&self, ctx: &RunCtx) -> Result<()> {
        if self.session.stream_state() == StreamState::AlarmLocked {
            tracing::warn!("Alarm during macro at line {}", ctx.current_line);
            return Err(MacroError::AlarmDuringMacro {
                line: ctx.current_line,
            }
            .into());
        }
        Ok(())
    }

    fn exec_ops(&self, ops: &[Op], ctx: &mut RunCtx) -> Result<()> {
        for op in ops {
            self.check_alarm(ctx)?;
            match op {
                Op::Line {
                    segments,
                    source_line,
                } => {
                    ctx.current_line = *source_line;
                    let line = render_line(segments, &ctx.vars)?;
                    if line.is_empty() {
                        continue;
                    }
                    self.send_and_settle(&line, ctx)?;
                }
                Op::Assign {
                    name,
                    expr,
                    source_line,
                } => {
                    ctx.current_line = *source_line;
                    let value = eval(expr, &ctx.vars)?;
                    ctx.vars.set(name.clone(), value);
                }
                Op::Wait => {
                    self.wait_idle(ctx)?;
                    self.refresh_vars(&mut ctx.vars);
                }
                Op::Msg(msg) => {
                    tracing::info!("[macro] {}", msg);
                    ctx.report.messages.push(msg.clone());
                }
                Op::Update => {
                    let before = self.session.status_revision();
                    self.session.request_status()?;
                    if !self.wait_revision_advance(before) {
                        return Err(MacroError::Timeout.into());
                    }
                    self.refresh_vars(&mut ctx.vars);
                }
                Op::StateReturn => {
                    self.restore_snapshot(ctx)?;
                }
                Op::If {
                    cond,
                    then_ops,
                    else_ops,
                } => {
                    self.refresh_vars(&mut ctx.vars);
                    if eval_cond(cond, &ctx.vars)? {
                        self.exec_ops(then_ops, ctx)?;
                    } else {
                        self.exec_ops(else_ops, ctx)?;
                    }
                }
                Op::For { var, from, to, body } => {
                    let from = eval(from, &ctx.vars)?;
                    let to = eval(to, &ctx.vars)?;
                    let (mut i, end) = (as_int(&from)?, as_int(&to)?);
                    let mut guard = 0;
                    while i <= end {
                        ctx.vars.set_number(var.clone(), i as f64);
                        self.exec_ops(body, ctx)?;
                        i += 1;
                        guard += 1;
                        if guard > 10_000 {
                            return Err(MacroError::EvalError {
                                reason: "%for exceeded 10000 iterations".into(),
                            }
                            .into());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn send_and_settle(&self, line: &str, ctx: &mut RunCtx) -> Result<()> {
        self.session.send_line(line)?;
        ctx.report.lines_sent += 1;
        if !self.session.wait_sends_drained(self.options.wait_timeout) {
            return Err(MacroError::Timeout.into());
        }
        self.wait_idle(ctx)
    }

    /// Poll status until the machine reports Idle.
    fn wait_idle(&self, ctx: &RunCtx) -> Result<()> {
        let deadline = Instant::now() + self.options.wait_timeout;
        loop {
            self.check_alarm(ctx)?;
            if self.session.machine_state() == Some(MachineState::Idle) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MacroError::Timeout.into());
            }
            let _ = self.session.request_status();
            std::thread::sleep(self.options.poll_interval);
        }
    }

    fn wait_revision_advance(&self, before: u64) -> bool {
        let deadline = Instant::now() + self.options.wait_timeout;
        while self.session.status_revision() <= before {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(self.options.poll_interval);
        }
        true
    }

    fn restore_snapshot(&self, ctx: &mut RunCtx) -> Result<()> {
        let lines = preamble_lines(&ctx.snapshot);
        for line in lines {
            self.send_and_settle(&line, ctx)?;
        }
        ctx.restored = true;
        Ok(())
    }
}

fn as_int(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => Ok(n.round() as i64),
        other => Err(Error::from(MacroError::EvalError {
            reason: format!("expected a number, got {}", other),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeSession {
        sent: Arc<Mutex<Vec<String>>>,
        parser_seq: Arc<AtomicU64>,
        revision: Arc<AtomicU64>,
        alarm: Arc<Mutex<bool>>,
    }

    impl MachineSession for FakeSession {
        fn is_connected(&self) -> bool {
            true
        }

        fn stream_state(&self) -> StreamState {
            if *self.alarm.lock() {
                StreamState::AlarmLocked
            } else {
                StreamState::Idle
            }
        }

        fn send_line(&self, line: &str) -> Result<()> {
            if line == "$G" {
                self.parser_seq.fetch_add(1, Ordering::SeqCst);
            }
            self.sent.lock().push(line.to_string());
            Ok(())
        }

        fn wait_sends_drained(&self, _timeout: Duration) -> bool {
            true
        }

        fn machine_state(&self) -> Option<MachineState> {
            Some(MachineState::Idle)
        }

        fn status_revision(&self) -> u64 {
            self.revision.load(Ordering::SeqCst)
        }

        fn request_status(&self) -> Result<()> {
            self.revision.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn parser_state(&self) -> (Option<ModalSnapshot>, u64) {
            let snapshot = ModalSnapshot {
                units: Some("G20".to_string()),
                distance: Some("G90".to_string()),
                wcs: Some("G54".to_string()),
                ..Default::default()
            };
            (Some(snapshot), self.parser_seq.load(Ordering::SeqCst))
        }

        fn work_position(&self) -> Option<[f64; 3]> {
            Some([1.0, 2.0, -0.5])
        }

        fn machine_position(&self) -> Option<[f64; 3]> {
            Some([11.0, 12.0, -10.5])
        }
    }

    fn macro_file(body: &str) -> MacroFile {
        MacroFile {
            index: 1,
            path: PathBuf::from("Macro-1"),
            label: "Test".to_string(),
            tooltip: String::new(),
            button_color: None,
            text_color: None,
            body: body.lines().map(|l| l.to_string()).collect(),
        }
    }

    fn executor(scripting: bool) -> (MacroExecutor<FakeSession>, FakeSession) {
        let session = FakeSession::default();
        let options = MacroOptions {
            scripting_enabled: scripting,
            wait_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
        };
        (
            MacroExecutor::new(session.clone(), CommandGate::new(), options),
            session,
        )
    }

    #[test]
    fn runs_snapshot_then_metric_then_body() {
        let (exec, session) = executor(false);
        let report = exec.run(&macro_file("G0 X0\nM5\n")).unwrap();
        let sent = session.sent.lock().clone();
        // $G snapshot, forced G21, body, then unit restore (G20).
        assert_eq!(sent, ["$G", "G21", "G0 X0", "M5", "G20"]);
        assert_eq!(report.lines_sent, 2);
        assert!(!report.state_restored);
    }

    #[test]
    fn state_return_restores_full_snapshot() {
        let (exec, session) = executor(false);
        let report = exec.run(&macro_file("G0 X0\n%state_return\n")).unwrap();
        let sent = session.sent.lock().clone();
        assert!(sent.contains(&"G20".to_string()));
        assert!(sent.contains(&"G90".to_string()));
        assert!(sent.contains(&"G54".to_string()));
        assert!(report.state_restored);
    }

    #[test]
    fn msg_and_wait_directives() {
        let (exec, _session) = executor(false);
        let report = exec.run(&macro_file("%msg touching off\n%wait\nG0 X0\n")).unwrap();
        assert_eq!(report.messages, vec!["touching off".to_string()]);
        assert_eq!(report.lines_sent, 1);
    }

    #[test]
    fn scripting_interpolates_variables() {
        let (exec, session) = executor(true);
        exec.run(&macro_file("depth = 1.5\nG1 Z[-depth] F100\n")).unwrap();
        let sent = session.sent.lock().clone();
        assert!(sent.contains(&"G1 Z-1.5 F100".to_string()));
    }

    #[test]
    fn for_loop_repeats_body() {
        let (exec, session) = executor(true);
        exec.run(&macro_file("%for i = 1 .. 3\nG0 X[i]\n%endfor\n")).unwrap();
        let sent = session.sent.lock().clone();
        assert!(sent.contains(&"G0 X1".to_string()));
        assert!(sent.contains(&"G0 X2".to_string()));
        assert!(sent.contains(&"G0 X3".to_string()));
    }

    #[test]
    fn machine_state_vars_are_available() {
        let (exec, session) = executor(true);
        exec.run(&macro_file("G0 Z[wpos.z + 1]\n")).unwrap();
        let sent = session.sent.lock().clone();
        assert!(sent.contains(&"G0 Z0.5".to_string()));
    }

    #[test]
    fn alarm_aborts_the_run() {
        let (exec, session) = executor(false);
        *session.alarm.lock() = true;
        let err = exec.run(&macro_file("G0 X0\n")).unwrap_err();
        assert!(matches!(
            err,
            Error::Gate(simplesender_core::GateError::BlockedByAlarm)
        ));
    }

    #[test]
    fn gate_is_released_after_run() {
        let (exec, _session) = executor(false);
        exec.run(&macro_file("G0 X0\n")).unwrap();
        exec.run(&macro_file("G0 X1\n")).unwrap();
    }
}
