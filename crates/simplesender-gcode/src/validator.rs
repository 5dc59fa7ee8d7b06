//! Pre-flight validation against the GRBL 1.1h dialect.
//!
//! Produces a report of over-length lines, unsupported axes and words,
//! unknown G/M codes, and modal hazards the operator should review before
//! streaming. Validation never blocks a load; the byte policy does.

use std::collections::BTreeMap;

use simplesender_core::constants::MAX_LINE_BYTES;

use crate::words::{parse_words, wire_len};

const DETAIL_LINE_LIMIT: usize = 200;

const SUPPORTED_G_CODES: [f64; 44] = [
    0.0, 1.0, 2.0, 3.0, 4.0, 10.0, 17.0, 18.0, 19.0, 20.0, 21.0, 28.0, 28.1, 30.0, 30.1, 38.2,
    38.3, 38.4, 38.5, 40.0, 43.1, 49.0, 53.0, 54.0, 55.0, 56.0, 57.0, 58.0, 59.0, 59.1, 59.2,
    59.3, 61.0, 80.0, 90.0, 91.0, 90.1, 91.1, 92.0, 92.1, 92.2, 92.3, 93.0, 94.0,
];

const SUPPORTED_M_CODES: [i64; 10] = [0, 1, 2, 3, 4, 5, 7, 8, 9, 30];

const KNOWN_WORD_LETTERS: &str = "GMXYZIJKRFSTPLNQ";

const UNSUPPORTED_AXES: &str = "ABCUVW";

fn modal_hazard(code: f64) -> Option<&'static str> {
    if (code - 91.0).abs() < 1e-3 {
        Some("G91 (incremental distance mode)")
    } else if (code - 93.0).abs() < 1e-3 {
        Some("G93 (inverse time feed mode)")
    } else if (92.0..92.35).contains(&code) {
        Some("G92 offsets")
    } else {
        None
    }
}

/// Issues found on one line.
#[derive(Debug, Clone)]
pub struct LineIssue {
    /// 1-based line number.
    pub line_no: usize,
    /// The line text.
    pub line: String,
    /// Distinct issue descriptions.
    pub issues: Vec<String>,
}

/// Aggregate validation results for a job.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Total lines scanned.
    pub total_lines: usize,
    /// Lines exceeding the byte policy.
    pub long_line_count: usize,
    /// First few (line, byte-length) pairs of long lines.
    pub long_lines: Vec<(usize, usize)>,
    /// Counts of unsupported axis letters.
    pub unsupported_axes: BTreeMap<char, usize>,
    /// Counts of unknown word letters.
    pub unsupported_words: BTreeMap<char, usize>,
    /// Counts of G codes outside the 1.1h set.
    pub unsupported_g_codes: BTreeMap<String, usize>,
    /// Counts of M codes outside the 1.1h set.
    pub unsupported_m_codes: BTreeMap<String, usize>,
    /// Modal hazards present anywhere in the job.
    pub modal_hazards: Vec<&'static str>,
    /// Number of lines with at least one issue.
    pub line_issue_count: usize,
    /// Per-line detail, capped.
    pub line_issues: Vec<LineIssue>,
    /// True when the detail list was truncated.
    pub truncated: bool,
}

fn format_g_code(code: f64) -> String {
    if (code - code.round()).abs() < 1e-9 {
        format!("G{}", code.round() as i64)
    } else {
        format!("G{}", code)
    }
}

/// Validate job lines against the GRBL 1.1h dialect.
pub fn validate_lines<'a, I>(lines: I) -> ValidationReport
where
    I: IntoIterator<Item = &'a str>,
{
    let mut report = ValidationReport::default();

    for (idx, raw) in lines.into_iter().enumerate() {
        let line_no = idx + 1;
        report.total_lines += 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let mut issues: Vec<String> = Vec::new();
        let mut push_issue = |issues: &mut Vec<String>, text: String| {
            if !issues.contains(&text) {
                issues.push(text);
            }
        };

        let len = wire_len(line);
        if len > MAX_LINE_BYTES {
            report.long_line_count += 1;
            if report.long_lines.len() < 5 {
                report.long_lines.push((line_no, len));
            }
            push_issue(&mut issues, format!("Long line ({} bytes)", len));
        }

        for word in parse_words(&line.to_ascii_uppercase()) {
            if UNSUPPORTED_AXES.contains(word.letter) {
                *report.unsupported_axes.entry(word.letter).or_insert(0) += 1;
                push_issue(&mut issues, format!("Unsupported axis {}", word.letter));
            } else if !KNOWN_WORD_LETTERS.contains(word.letter) {
                *report.unsupported_words.entry(word.letter).or_insert(0) += 1;
                push_issue(&mut issues, format!("Unknown word letter {}", word.letter));
            }
            match word.letter {
                'G' => {
                    let Some(code) = word.number() else { continue };
                    let code = (code * 1000.0).round() / 1000.0;
                    if let Some(hazard) = modal_hazard(code) {
                        if !report.modal_hazards.contains(&hazard) {
                            report.modal_hazards.push(hazard);
                        }
                        push_issue(&mut issues, format!("Modal hazard: {}", hazard));
                    }
                    if !SUPPORTED_G_CODES.iter().any(|c| (c - code).abs() < 1e-3) {
                        let label = format_g_code(code);
                        *report.unsupported_g_codes.entry(label.clone()).or_insert(0) += 1;
                        push_issue(&mut issues, format!("Unsupported G-code {}", label));
                    }
                }
                'M' => {
                    let Some(code) = word.number() else { continue };
                    let label = if (code - code.round()).abs() > 1e-6 {
                        format!("M{}", word.value)
                    } else if SUPPORTED_M_CODES.contains(&(code.round() as i64)) {
                        continue;
                    } else {
                        format!("M{}", code.round() as i64)
                    };
                    *report.unsupported_m_codes.entry(label.clone()).or_insert(0) += 1;
                    push_issue(&mut issues, format!("Unsupported M-code {}", label));
                }
                _ => {}
            }
        }

        if !issues.is_empty() {
            report.line_issue_count += 1;
            if report.line_issues.len() < DETAIL_LINE_LIMIT {
                report.line_issues.push(LineIssue {
                    line_no,
                    line: line.to_string(),
                    issues,
                });
            } else {
                report.truncated = true;
            }
        }
    }

    report
}

fn format_counts<K: std::fmt::Display>(counts: &BTreeMap<K, usize>) -> String {
    counts
        .iter()
        .take(5)
        .map(|(k, v)| format!("{} ({})", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a human-readable summary of a report.
pub fn format_validation_report(report: &ValidationReport) -> String {
    let mut issues: Vec<String> = Vec::new();
    if let Some((first_line, first_len)) = report.long_lines.first() {
        issues.push(format!(
            "Long lines (> {} bytes): {} (first at line {}, {} bytes).",
            MAX_LINE_BYTES, report.long_line_count, first_line, first_len
        ));
    }
    if !report.unsupported_axes.is_empty() {
        issues.push(format!(
            "Unsupported axes: {}.",
            format_counts(&report.unsupported_axes)
        ));
    }
    if !report.unsupported_g_codes.is_empty() {
        issues.push(format!(
            "Unsupported G-codes (not in GRBL 1.1h list): {}.",
            format_counts(&report.unsupported_g_codes)
        ));
    }
    if !report.unsupported_m_codes.is_empty() {
        issues.push(format!(
            "Unsupported M-codes (not in GRBL 1.1h list): {}.",
            format_counts(&report.unsupported_m_codes)
        ));
    }
    if !report.modal_hazards.is_empty() {
        issues.push(format!("Modal hazards: {}.", report.modal_hazards.join(", ")));
    }
    if !report.unsupported_words.is_empty() {
        issues.push(format!(
            "Unknown word letters: {}.",
            format_counts(&report.unsupported_words)
        ));
    }
    if issues.is_empty() {
        issues.push("No issues detected.".to_string());
    }
    format!("G-code validation (GRBL 1.1h):\n- {}", issues.join("\n- "))
}
