//! GRBL 1.1h error and alarm code tables.
//!
//! Numeric `error:N` / `ALARM:N` codes mapped to the firmware documentation
//! text, plus helpers that annotate raw protocol lines for the console.

use once_cell::sync::Lazy;
use regex::Regex;

static ERROR_CODE_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)error:(\d+)").expect("error code pattern"));
static ALARM_CODE_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)ALARM:(\d+)").expect("alarm code pattern"));

/// Description for a GRBL `error:N` code.
pub fn error_description(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Expected command letter.",
        2 => "Bad number format.",
        3 => "Invalid statement (unrecognized/unsupported '$' command).",
        4 => "Value < 0.",
        5 => "Setting disabled (homing not enabled).",
        6 => "Value < 3 usec (step pulse too short).",
        7 => "EEPROM read fail. Using defaults.",
        8 => "Not idle (cannot run that '$' command unless IDLE).",
        9 => "G-code lock (locked out during alarm/jog).",
        10 => "Homing not enabled (soft limits require homing).",
        11 => "Line overflow (too many characters; line not executed).",
        12 => "Step rate > 30kHz (settings exceed max step rate).",
        13 => "Check Door (safety door opened / door state).",
        14 => "Line length exceeded (startup/build info too long for EEPROM storage).",
        15 => "Travel exceeded (jog target exceeds travel; ignored).",
        16 => "Invalid jog command (missing '=' or contains prohibited g-code).",
        17 => "Setting disabled (laser mode requires PWM output).",
        20 => "Unsupported command (invalid/unsupported g-code).",
        21 => "Modal group violation.",
        22 => "Undefined feed rate.",
        23 => "Requires integer value.",
        24 => ">1 axis-word-requiring command in block.",
        25 => "Repeated g-code word in block.",
        26 => "No axis words found when required.",
        27 => "Invalid line number.",
        28 => "Missing required value word.",
        29 => "G59.x WCS not supported.",
        30 => "G53 only allowed with G0/G1.",
        31 => "Axis words present but unused by command/modal state.",
        32 => "G2/G3 require at least one in-plane axis word.",
        33 => "Motion target invalid.",
        34 => "Arc radius invalid.",
        35 => "G2/G3 require at least one in-plane offset word.",
        36 => "Unused value words found in block.",
        37 => "G43.1 TLO not assigned to configured tool length axis.",
        38 => "Tool number > max supported.",
        _ => return None,
    };
    Some(text)
}

/// Description for a GRBL `ALARM:N` code.
pub fn alarm_description(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Hard limit: hard limit triggered; position likely lost; re-home recommended.",
        2 => "Soft limit: target exceeds travel; position retained; may unlock safely.",
        3 => "Abort during cycle: reset while in motion; position likely lost; re-home recommended.",
        4 => "Probe fail: probe not in expected initial state for the probing mode used.",
        5 => "Probe fail: probe did not contact within programmed travel.",
        6 => "Homing fail: active homing cycle was reset.",
        7 => "Homing fail: safety door opened during homing.",
        8 => "Homing fail: pull-off travel failed to clear the switch.",
        9 => "Homing fail: could not find switch within search distance.",
        10 => "Homing fail: dual-axis second switch did not trigger within the allowed distance.",
        _ => return None,
    };
    Some(text)
}

fn extract_code(pat: &Regex, line: &str) -> Option<u8> {
    pat.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u8>().ok())
}

/// Append the error description to a raw `error:N` line.
///
/// Lines that already carry a parenthesized annotation after the code are
/// returned unchanged.
pub fn annotate_error(line: &str) -> String {
    let Some(code) = extract_code(&ERROR_CODE_PAT, line) else {
        return line.to_string();
    };
    let Some(desc) = error_description(code) else {
        return line.to_string();
    };
    let marker = format!("error:{}", code);
    if let Some(pos) = line.to_ascii_lowercase().find(&marker) {
        if line[pos..].contains('(') {
            return line.to_string();
        }
    }
    format!("{} ({})", line, desc)
}

/// Append the alarm description to a raw `ALARM:N` line.
pub fn annotate_alarm(line: &str) -> String {
    let Some(code) = extract_code(&ALARM_CODE_PAT, line) else {
        return line.to_string();
    };
    let Some(desc) = alarm_description(code) else {
        return line.to_string();
    };
    let marker = format!("alarm:{}", code);
    if let Some(pos) = line.to_ascii_lowercase().find(&marker) {
        if line[pos..].contains('(') {
            return line.to_string();
        }
    }
    format!("{} ({})", line, desc)
}

/// Annotate a line as either an error or an alarm, whichever matches.
pub fn annotate_message(line: &str) -> String {
    if line.is_empty() {
        return line.to_string();
    }
    let annotated = annotate_error(line);
    if annotated != line {
        return annotated;
    }
    annotate_alarm(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotates_known_error() {
        assert_eq!(
            annotate_error("error:20"),
            "error:20 (Unsupported command (invalid/unsupported g-code).)"
        );
    }

    #[test]
    fn leaves_annotated_line_alone() {
        let line = "error:20 (already described)";
        assert_eq!(annotate_error(line), line);
    }

    #[test]
    fn annotates_alarm_case_insensitive() {
        let out = annotate_message("ALARM:1");
        assert!(out.contains("Hard limit"));
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(annotate_error("error:99"), "error:99");
        assert_eq!(annotate_alarm("ALARM:42"), "ALARM:42");
    }
}
