//! Modal pre-scan for Resume-From.
//!
//! Walks the processed job prefix ahead of a resume target, folds every
//! modal word into a [`ModalSnapshot`], and synthesizes the preamble lines
//! that restore that state before the resume line is streamed.

use simplesender_core::constants::MAX_LINE_BYTES;
use simplesender_core::types::{CoolantMode, ModalSnapshot, SpindleMode};

use crate::source::JobSource;
use crate::words::{format_float, parse_words};

/// The output of a pre-scan: snapshot, preamble, and the G92 warning flag.
#[derive(Debug, Clone, Default)]
pub struct ResumePlan {
    /// Modal state at the resume target.
    pub snapshot: ModalSnapshot,
    /// Setup lines to stream before the target line, each within policy.
    pub preamble: Vec<String>,
    /// True when any G92 offset command appeared before the target.
    ///
    /// The operator must confirm work zero before resuming in that case.
    pub saw_g92: bool,
}

/// Single-pass modal scanner.
#[derive(Debug, Default)]
pub struct ModalPreScanner {
    snapshot: ModalSnapshot,
    saw_g92: bool,
}

fn is_code(code: f64, target: f64) -> bool {
    (code - target).abs() < 1e-3
}

impl ModalPreScanner {
    /// Create a scanner with no modal state observed yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one processed line into the modal state.
    pub fn observe(&mut self, line: &str) {
        let upper = line.trim().to_ascii_uppercase();
        if upper.is_empty() || upper.starts_with('$') {
            return;
        }
        for word in parse_words(&upper) {
            let Some(value) = word.number() else { continue };
            match word.letter {
                'G' => self.observe_g(value, &word.value),
                'M' => self.observe_m(value),
                'F' => self.snapshot.feed = Some(value),
                'S' => self.snapshot.spindle_speed = Some(value),
                'T' => {
                    if value >= 0.0 {
                        self.snapshot.tool = Some(value as u32);
                    }
                }
                _ => {}
            }
        }
    }

    fn observe_g(&mut self, code: f64, raw: &str) {
        if is_code(code, 92.0) || is_code(code, 92.1) || is_code(code, 92.2) || is_code(code, 92.3)
        {
            self.saw_g92 = true;
            return;
        }
        let gstr = format!("G{}", raw);
        if is_code(code, 0.0) || is_code(code, 1.0) || is_code(code, 2.0) || is_code(code, 3.0) {
            self.snapshot.motion = Some(format!("G{}", code as u8));
        } else if is_code(code, 20.0) || is_code(code, 21.0) {
            self.snapshot.units = Some(gstr);
        } else if is_code(code, 90.0) || is_code(code, 91.0) {
            self.snapshot.distance = Some(gstr);
        } else if is_code(code, 17.0) || is_code(code, 18.0) || is_code(code, 19.0) {
            self.snapshot.plane = Some(gstr);
        } else if is_code(code, 93.0) || is_code(code, 94.0) || is_code(code, 95.0) {
            self.snapshot.feed_mode = Some(gstr);
        } else if is_code(code, 90.1) || is_code(code, 91.1) {
            self.snapshot.arc_distance = Some(gstr);
        } else if (54.0..=59.9).contains(&code)
            && (is_code(code, 54.0)
                || is_code(code, 55.0)
                || is_code(code, 56.0)
                || is_code(code, 57.0)
                || is_code(code, 58.0)
                || is_code(code, 59.0)
                || is_code(code, 59.1)
                || is_code(code, 59.2)
                || is_code(code, 59.3))
        {
            self.snapshot.wcs = Some(gstr);
        }
    }

    fn observe_m(&mut self, code: f64) {
        if (code - code.round()).abs() > 1e-6 {
            return;
        }
        match code.round() as i64 {
            3 => self.snapshot.spindle = Some(SpindleMode::Cw),
            4 => self.snapshot.spindle = Some(SpindleMode::Ccw),
            5 => self.snapshot.spindle = Some(SpindleMode::Off),
            7 => self.snapshot.coolant = Some(CoolantMode::Mist),
            8 => self.snapshot.coolant = Some(CoolantMode::Flood),
            9 => self.snapshot.coolant = Some(CoolantMode::Off),
            _ => {}
        }
    }

    /// Finish the scan.
    pub fn finish(self) -> (ModalSnapshot, bool) {
        (self.snapshot, self.saw_g92)
    }
}

/// Scan `[0, target_index)` of a job source and build the resume plan.
///
/// `target_index` is the zero-based job line the stream will resume at.
pub fn build_resume_preamble(source: &JobSource, target_index: usize) -> ResumePlan {
    let mut scanner = ModalPreScanner::new();
    for line in source.iter_from(0).take(target_index) {
        scanner.observe(&line.text);
    }
    let (snapshot, saw_g92) = scanner.finish();
    let preamble = preamble_lines(&snapshot);
    ResumePlan {
        snapshot,
        preamble,
        saw_g92,
    }
}

/// Render the preamble for a snapshot.
///
/// Modal words are grouped into short lines, one concern each; every line
/// is asserted against the byte policy. Feed is restored together with the
/// motion modal (`G1 F800`) so a following axis-only line keeps both.
pub fn preamble_lines(snapshot: &ModalSnapshot) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in [
        &snapshot.units,
        &snapshot.distance,
        &snapshot.plane,
        &snapshot.arc_distance,
        &snapshot.feed_mode,
        &snapshot.wcs,
    ]
    .into_iter()
    .flatten()
    {
        out.push(item.clone());
    }
    match snapshot.spindle {
        Some(SpindleMode::Cw) | Some(SpindleMode::Ccw) => {
            let m = if snapshot.spindle == Some(SpindleMode::Cw) {
                "M3"
            } else {
                "M4"
            };
            if let Some(speed) = snapshot.spindle_speed {
                out.push(format!("{} S{}", m, format_float(speed, 3)));
            } else {
                out.push(m.to_string());
            }
        }
        Some(SpindleMode::Off) => out.push("M5".to_string()),
        None => {}
    }
    match snapshot.coolant {
        Some(CoolantMode::Mist) => out.push("M7".to_string()),
        Some(CoolantMode::Flood) => out.push("M8".to_string()),
        Some(CoolantMode::Off) => out.push("M9".to_string()),
        None => {}
    }
    if let Some(feed) = snapshot.feed {
        let feed_text = format_float(feed, 3);
        match snapshot.motion.as_deref() {
            Some("G1") | Some("G2") | Some("G3") => out.push(format!("G1 F{}", feed_text)),
            _ => out.push(format!("F{}", feed_text)),
        }
    }
    debug_assert!(out.iter().all(|l| l.len() + 1 <= MAX_LINE_BYTES));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Line;

    fn in_memory(lines: &[&str]) -> JobSource {
        JobSource::InMemory(
            lines
                .iter()
                .enumerate()
                .map(|(i, text)| Line {
                    text: (*text).to_string(),
                    number: i + 1,
                    source_line: Some(i + 1),
                })
                .collect(),
        )
    }

    #[test]
    fn scans_header_modals() {
        let source = in_memory(&["G21", "G90", "G54", "M3 S12000", "G1 F800", "G1 X1", "G1 X2"]);
        let plan = build_resume_preamble(&source, 6);
        assert_eq!(
            plan.preamble,
            ["G21", "G90", "G54", "M3 S12000", "G1 F800"]
        );
        assert!(!plan.saw_g92);
    }

    #[test]
    fn later_modals_win() {
        let source = in_memory(&["G20", "G21", "G91", "G90", "M4 S500", "G1 X1"]);
        let plan = build_resume_preamble(&source, 5);
        assert_eq!(plan.snapshot.units.as_deref(), Some("G21"));
        assert_eq!(plan.snapshot.distance.as_deref(), Some("G90"));
        assert!(plan.preamble.contains(&"M4 S500".to_string()));
    }

    #[test]
    fn flags_prior_g92() {
        let source = in_memory(&["G21", "G92 X0 Y0", "G1 X1"]);
        let plan = build_resume_preamble(&source, 2);
        assert!(plan.saw_g92);
    }

    #[test]
    fn feed_without_motion_restores_bare_f() {
        let source = in_memory(&["G21", "F250", "G1 X1"]);
        let plan = build_resume_preamble(&source, 2);
        assert!(plan.preamble.contains(&"F250".to_string()));
    }

    #[test]
    fn scan_stops_before_target() {
        let source = in_memory(&["G21", "G90", "G20"]);
        let plan = build_resume_preamble(&source, 2);
        assert_eq!(plan.snapshot.units.as_deref(), Some("G21"));
    }
}
