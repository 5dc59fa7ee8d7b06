//! Real-time override planning.
//!
//! GRBL's feed and spindle overrides move in 10% steps around 100%; slider
//! UIs pick a target percent and this module emits the byte sequence that
//! reaches it. Override bytes bypass the outbound queue and never count
//! against the RX window.

use simplesender_core::constants::{
    RT_FEED_MINUS_10, RT_FEED_PLUS_10, RT_FEED_RESET, RT_RAPID_FULL, RT_RAPID_HALF,
    RT_RAPID_QUARTER, RT_SPINDLE_MINUS_10, RT_SPINDLE_PLUS_10, RT_SPINDLE_RESET,
};

/// Which override channel a plan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideKind {
    /// Feed rate override (10-200%).
    Feed,
    /// Spindle speed override (10-200%).
    Spindle,
}

impl OverrideKind {
    fn bytes(self) -> (u8, u8, u8) {
        match self {
            Self::Feed => (RT_FEED_RESET, RT_FEED_PLUS_10, RT_FEED_MINUS_10),
            Self::Spindle => (RT_SPINDLE_RESET, RT_SPINDLE_PLUS_10, RT_SPINDLE_MINUS_10),
        }
    }
}

/// Plan the real-time bytes that move `current` percent to `target`.
///
/// Both values are clamped to GRBL's 10-200% range and snapped to the
/// 10% granularity. A target of exactly 100% uses the single reset byte.
pub fn override_plan(kind: OverrideKind, current: u16, target: u16) -> Vec<u8> {
    let (reset, plus, minus) = kind.bytes();
    let snap = |v: u16| -> i32 {
        let clamped = v.clamp(10, 200) as i32;
        (clamped + 5) / 10 * 10
    };
    let current = snap(current);
    let target = snap(target);

    if target == 100 {
        return if current == 100 { Vec::new() } else { vec![reset] };
    }

    let mut out = Vec::new();
    let mut at = current;
    while at < target {
        out.push(plus);
        at += 10;
    }
    while at > target {
        out.push(minus);
        at -= 10;
    }
    out
}

/// The single byte that selects a rapid override level.
///
/// GRBL supports 25%, 50%, and 100% only; other values return `None`.
pub fn rapid_override_byte(percent: u8) -> Option<u8> {
    match percent {
        25 => Some(RT_RAPID_QUARTER),
        50 => Some(RT_RAPID_HALF),
        100 => Some(RT_RAPID_FULL),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_target_in_ten_percent_steps() {
        let plan = override_plan(OverrideKind::Feed, 100, 130);
        assert_eq!(plan, vec![RT_FEED_PLUS_10; 3]);
        let plan = override_plan(OverrideKind::Spindle, 100, 80);
        assert_eq!(plan, vec![RT_SPINDLE_MINUS_10; 2]);
    }

    #[test]
    fn hundred_percent_is_reset() {
        assert_eq!(override_plan(OverrideKind::Feed, 150, 100), vec![RT_FEED_RESET]);
        assert!(override_plan(OverrideKind::Feed, 100, 100).is_empty());
    }

    #[test]
    fn clamps_to_firmware_range() {
        let plan = override_plan(OverrideKind::Feed, 100, 250);
        assert_eq!(plan.len(), 10);
        let plan = override_plan(OverrideKind::Feed, 100, 0);
        assert_eq!(plan, vec![RT_FEED_MINUS_10; 9]);
    }

    #[test]
    fn rapid_levels() {
        assert_eq!(rapid_override_byte(50), Some(RT_RAPID_HALF));
        assert_eq!(rapid_override_byte(75), None);
    }
}
