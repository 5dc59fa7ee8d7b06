//! Raw line cleaning.
//!
//! Strips BOM remnants, `(...)` block comments, `;` line comments, and `%`
//! program frame lines before the compaction/split passes.

use once_cell::sync::Lazy;
use regex::Regex;

static PAREN_COMMENT_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(.*?\)").expect("paren comment pattern"));

/// Strip comments and whitespace from one raw input line.
///
/// Returns the cleaned text, or an empty string for lines that carry no
/// G-code (blanks, comments, `%` frames).
pub fn clean_gcode_line(raw: &str) -> String {
    let mut line = raw.replace('\u{feff}', "");
    line = PAREN_COMMENT_PAT.replace_all(&line, "").into_owned();
    if let Some(pos) = line.find(';') {
        line.truncate(pos);
    }
    let line = line.trim();
    if line.starts_with('%') {
        return String::new();
    }
    line.to_string()
}

/// Check that a line contains only tab and printable ASCII.
pub fn is_clean_ascii(line: &str) -> bool {
    line.bytes().all(|b| b == 0x09 || (0x20..=0x7e).contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_frames() {
        assert_eq!(clean_gcode_line("G1 X1 (move) Y2 ; trailing"), "G1 X1  Y2");
        assert_eq!(clean_gcode_line("%"), "");
        assert_eq!(clean_gcode_line("% program frame"), "");
        assert_eq!(clean_gcode_line("  ; only a comment"), "");
    }

    #[test]
    fn strips_bom() {
        assert_eq!(clean_gcode_line("\u{feff}G21"), "G21");
    }

    #[test]
    fn ascii_check_allows_tab() {
        assert!(is_clean_ascii("G1\tX1"));
        assert!(!is_clean_ascii("G1 Xü"));
    }
}
