//! GRBL response classification.
//!
//! Splits the inbound record stream into acknowledgments, alarms, status
//! reports, the startup banner, feedback messages, settings, and the `$G`
//! parser state.

use simplesender_core::types::ModalSnapshot;
use simplesender_gcode::resume::ModalPreScanner;

use super::status::StatusReport;

/// Classified GRBL response line.
#[derive(Debug, Clone, PartialEq)]
pub enum GrblResponse {
    /// `ok` acknowledgment.
    Ok,
    /// `error:N` acknowledgment.
    Error(u8),
    /// `ALARM:N`.
    Alarm(u8),
    /// `<...>` status report.
    Status(StatusReport),
    /// Startup banner (`Grbl 1.1h ['$' for help]`).
    Banner {
        /// Version text after "Grbl ".
        version: String,
    },
    /// `[GC:...]` parser state.
    ParserState(ModalSnapshot),
    /// Other `[...]` feedback (`[MSG:...]`, `[PRB:...]`, build info).
    Feedback(String),
    /// `$n=value` setting line.
    Setting {
        /// Setting number.
        number: u16,
        /// Raw value text.
        value: String,
    },
    /// Anything else.
    Message(String),
}

/// Classify one inbound record.
///
/// Returns `None` for empty lines.
pub fn parse_response(line: &str) -> Option<GrblResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if line.eq_ignore_ascii_case("ok") {
        return Some(GrblResponse::Ok);
    }

    let lower = line.to_ascii_lowercase();
    if let Some(code) = lower.strip_prefix("error:") {
        if let Ok(code) = code.trim().parse::<u8>() {
            return Some(GrblResponse::Error(code));
        }
        return Some(GrblResponse::Message(line.to_string()));
    }
    if let Some(code) = lower.strip_prefix("alarm:") {
        if let Ok(code) = code.trim().parse::<u8>() {
            return Some(GrblResponse::Alarm(code));
        }
        return Some(GrblResponse::Message(line.to_string()));
    }

    if line.starts_with('<') && line.ends_with('>') {
        if let Some(report) = StatusReport::parse(line) {
            return Some(GrblResponse::Status(report));
        }
        return Some(GrblResponse::Message(line.to_string()));
    }

    if lower.starts_with("grbl") {
        return Some(GrblResponse::Banner {
            version: line[4..].trim().to_string(),
        });
    }

    if line.starts_with('[') && line.ends_with(']') {
        let inner = &line[1..line.len() - 1];
        if let Some(gc) = inner.strip_prefix("GC:") {
            return Some(GrblResponse::ParserState(parse_parser_state(gc)));
        }
        return Some(GrblResponse::Feedback(inner.to_string()));
    }

    if let Some(rest) = line.strip_prefix('$') {
        if let Some((num, value)) = rest.split_once('=') {
            if let Ok(number) = num.trim().parse::<u16>() {
                return Some(GrblResponse::Setting {
                    number,
                    value: value.trim().to_string(),
                });
            }
        }
    }

    Some(GrblResponse::Message(line.to_string()))
}

/// Parse the `$G` payload (`G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0`).
fn parse_parser_state(gc: &str) -> ModalSnapshot {
    let mut scanner = ModalPreScanner::new();
    scanner.observe(gc);
    let (snapshot, _) = scanner.finish();
    snapshot
}

/// True for feedback lines that demand a reset (treated like alarms).
pub fn is_reset_feedback(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("[msg:") && lower.contains("reset to continue")
}

#[cfg(test)]
mod tests {
    use super::*;
    use simplesender_core::types::SpindleMode;

    #[test]
    fn classifies_acks() {
        assert_eq!(parse_response("ok"), Some(GrblResponse::Ok));
        assert_eq!(parse_response("error:20"), Some(GrblResponse::Error(20)));
        assert_eq!(parse_response("ALARM:1"), Some(GrblResponse::Alarm(1)));
    }

    #[test]
    fn classifies_banner() {
        match parse_response("Grbl 1.1h ['$' for help]") {
            Some(GrblResponse::Banner { version }) => assert!(version.starts_with("1.1h")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_parser_state() {
        match parse_response("[GC:G1 G54 G17 G21 G90 G94 M3 M9 T2 F800 S12000]") {
            Some(GrblResponse::ParserState(snapshot)) => {
                assert_eq!(snapshot.units.as_deref(), Some("G21"));
                assert_eq!(snapshot.wcs.as_deref(), Some("G54"));
                assert_eq!(snapshot.spindle, Some(SpindleMode::Cw));
                assert_eq!(snapshot.feed, Some(800.0));
                assert_eq!(snapshot.spindle_speed, Some(12000.0));
                assert_eq!(snapshot.tool, Some(2));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reset_feedback_detection() {
        assert!(is_reset_feedback("[MSG:Reset to continue]"));
        assert!(!is_reset_feedback("[MSG:Enabled]"));
    }

    #[test]
    fn classifies_settings() {
        assert_eq!(
            parse_response("$110=8000.000"),
            Some(GrblResponse::Setting {
                number: 110,
                value: "8000.000".to_string()
            })
        );
    }
}
