//! GRBL status report parsing and tracking.
//!
//! Parses the `<State|MPos:...|Bf:...|WCO:...|Pn:...|FS:...|Ov:...>`
//! grammar and maintains the merged machine view: positions, work offset
//! carry-over, buffer availability, pin flags, and override percentages.

use serde::{Deserialize, Serialize};
use simplesender_core::types::{MachineState, PinFlags};

/// One parsed status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Machine state token.
    pub state: MachineState,
    /// Sub-state code (`Hold:0`, `Door:1`).
    pub sub_state: Option<u8>,
    /// Machine position.
    pub mpos: Option<[f64; 3]>,
    /// Work position.
    pub wpos: Option<[f64; 3]>,
    /// Work coordinate offset.
    pub wco: Option<[f64; 3]>,
    /// Available RX buffer bytes (first `Bf:` field).
    pub rx_avail: Option<u32>,
    /// Available planner blocks (second `Bf:` field).
    pub planner_avail: Option<u32>,
    /// Current feed rate.
    pub feed: Option<f64>,
    /// Current spindle speed.
    pub spindle: Option<f64>,
    /// Input pin flags.
    pub pins: Option<PinFlags>,
    /// Override percentages: feed, rapid, spindle.
    pub overrides: Option<[u16; 3]>,
    /// Line number (`Ln:`) when the firmware reports it.
    pub line_number: Option<u32>,
}

fn parse_triplet(text: &str) -> Option<[f64; 3]> {
    let mut values = text.split(',').map(|v| v.trim().parse::<f64>());
    let x = values.next()?.ok()?;
    let y = values.next()?.ok()?;
    let z = values.next()?.ok()?;
    Some([x, y, z])
}

impl StatusReport {
    /// Parse a `<...>` report; returns `None` for malformed payloads.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with('<') || !line.ends_with('>') {
            return None;
        }
        let inner = &line[1..line.len() - 1];
        let mut parts = inner.split('|');

        let state_token = parts.next()?.trim();
        let state = MachineState::parse(state_token)?;
        let sub_state = state_token
            .split_once(':')
            .and_then(|(_, sub)| sub.trim().parse::<u8>().ok());

        let mut report = Self {
            state,
            sub_state,
            mpos: None,
            wpos: None,
            wco: None,
            rx_avail: None,
            planner_avail: None,
            feed: None,
            spindle: None,
            pins: None,
            overrides: None,
            line_number: None,
        };

        for part in parts {
            let part = part.trim();
            if let Some(v) = part.strip_prefix("MPos:") {
                report.mpos = parse_triplet(v);
            } else if let Some(v) = part.strip_prefix("WPos:") {
                report.wpos = parse_triplet(v);
            } else if let Some(v) = part.strip_prefix("WCO:") {
                report.wco = parse_triplet(v);
            } else if let Some(v) = part.strip_prefix("Bf:") {
                let mut nums = v.split(',').map(|n| n.trim().parse::<u32>());
                report.rx_avail = nums.next().and_then(|n| n.ok());
                report.planner_avail = nums.next().and_then(|n| n.ok());
            } else if let Some(v) = part.strip_prefix("FS:") {
                let mut nums = v.split(',').map(|n| n.trim().parse::<f64>());
                report.feed = nums.next().and_then(|n| n.ok());
                report.spindle = nums.next().and_then(|n| n.ok());
            } else if let Some(v) = part.strip_prefix("F:") {
                report.feed = v.trim().parse::<f64>().ok();
            } else if let Some(v) = part.strip_prefix("Pn:") {
                report.pins = Some(PinFlags::parse(v));
            } else if let Some(v) = part.strip_prefix("Ov:") {
                let mut nums = v.split(',').map(|n| n.trim().parse::<u16>());
                let f = nums.next().and_then(|n| n.ok());
                let r = nums.next().and_then(|n| n.ok());
                let s = nums.next().and_then(|n| n.ok());
                if let (Some(f), Some(r), Some(s)) = (f, r, s) {
                    report.overrides = Some([f, r, s]);
                }
            } else if let Some(v) = part.strip_prefix("Ln:") {
                report.line_number = v.trim().parse::<u32>().ok();
            }
        }
        Some(report)
    }
}

/// Merged, monotonically updated machine view.
///
/// GRBL reports `WCO` only intermittently; the tracker carries the last
/// seen offset forward and derives whichever of MPos/WPos was omitted.
#[derive(Debug, Default)]
pub struct StatusTracker {
    last: Option<StatusReport>,
    wco: Option<[f64; 3]>,
    /// Increments on every parsed report; macro `%wait`/`%update` watch it.
    revision: u64,
}

impl StatusTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a parsed report into the view and return the merged copy.
    pub fn update(&mut self, mut report: StatusReport) -> StatusReport {
        if let Some(wco) = report.wco {
            self.wco = Some(wco);
        } else {
            report.wco = self.wco;
        }
        if report.wpos.is_none() {
            if let (Some(mpos), Some(wco)) = (report.mpos, report.wco) {
                report.wpos = Some([mpos[0] - wco[0], mpos[1] - wco[1], mpos[2] - wco[2]]);
            }
        }
        if report.mpos.is_none() {
            if let (Some(wpos), Some(wco)) = (report.wpos, report.wco) {
                report.mpos = Some([wpos[0] + wco[0], wpos[1] + wco[1], wpos[2] + wco[2]]);
            }
        }
        self.revision = self.revision.wrapping_add(1);
        self.last = Some(report.clone());
        report
    }

    /// Last merged report.
    pub fn last(&self) -> Option<&StatusReport> {
        self.last.as_ref()
    }

    /// Machine state of the last report.
    pub fn state(&self) -> Option<MachineState> {
        self.last.as_ref().map(|r| r.state)
    }

    /// Freshness stamp; increments on every parsed report.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}
