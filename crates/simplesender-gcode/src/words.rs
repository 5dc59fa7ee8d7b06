//! G-code word parsing and numeric normalization.
//!
//! A word is a letter followed by a signed decimal number. Compaction
//! rewrites a line as its words with normalized numbers and no separators,
//! dropping `N` line numbers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Pattern matching a single G-code word (letter + signed decimal).
pub static WORD_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z])([-+]?(?:\d+(?:\.\d*)?|\.\d+))").expect("word pattern"));

/// One parsed word: letter and raw numeric text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    /// Word letter, upper case.
    pub letter: char,
    /// Numeric text exactly as written.
    pub value: String,
}

impl Word {
    /// Numeric value of this word.
    pub fn number(&self) -> Option<f64> {
        self.value.parse::<f64>().ok()
    }
}

/// Parse all words from an upper-cased line.
pub fn parse_words(upper: &str) -> Vec<Word> {
    WORD_PAT
        .captures_iter(upper)
        .map(|c| Word {
            letter: c[1].chars().next().unwrap_or('?'),
            value: c[2].to_string(),
        })
        .collect()
}

/// True when the line consists solely of words and whitespace.
///
/// Lines with other tokens (e.g. `$`-commands, bracket expressions) cannot
/// be safely compacted or split.
pub fn is_safe_word_line(upper: &str) -> bool {
    WORD_PAT.replace_all(upper, "").trim().is_empty()
}

/// Byte length of a line on the wire, newline included.
pub fn wire_len(line: &str) -> usize {
    line.len() + 1
}

/// Normalize a numeric string: strip leading/trailing zeros, drop a lone
/// sign on zero, keep a leading `-` otherwise.
pub fn trim_number_str(value: &str) -> String {
    let text = value.trim();
    if text.is_empty() {
        return "0".to_string();
    }
    let (sign, rest) = match text.as_bytes()[0] {
        b'-' => ("-", &text[1..]),
        b'+' => ("", &text[1..]),
        _ => ("", text),
    };
    let normalized = if let Some((int_part, frac_part)) = rest.split_once('.') {
        let int_part = int_part.trim_start_matches('0');
        let int_part = if int_part.is_empty() { "0" } else { int_part };
        let frac_part = frac_part.trim_end_matches('0');
        if frac_part.is_empty() {
            int_part.to_string()
        } else {
            format!("{}.{}", int_part, frac_part)
        }
    } else {
        let t = rest.trim_start_matches('0');
        if t.is_empty() { "0" } else { t }.to_string()
    };
    if normalized == "0" {
        normalized
    } else {
        format!("{}{}", sign, normalized)
    }
}

/// Format a float with at most `max_decimals` places, trailing zeros
/// stripped, `-0` collapsed to `0`.
pub fn format_float(value: f64, max_decimals: usize) -> String {
    let mut text = format!("{:.*}", max_decimals, value);
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    if text == "-0" {
        text = "0".to_string();
    }
    text
}

/// Render one word with its number normalized.
pub fn format_word(word: &Word) -> String {
    format!("{}{}", word.letter, trim_number_str(&word.value))
}

/// Build the compact rendition of a word line.
///
/// Spaces between tokens are removed and `N` line numbers are dropped.
pub fn build_compact_line(words: &[Word]) -> String {
    let mut out = String::new();
    for w in words {
        if w.letter == 'N' {
            continue;
        }
        out.push_str(&format_word(w));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_words() {
        let words = parse_words("G1 X10.50 Y-0.25 F1200");
        let rendered: Vec<String> = words.iter().map(format_word).collect();
        assert_eq!(rendered, ["G1", "X10.5", "Y-0.25", "F1200"]);
    }

    #[test]
    fn trims_numbers() {
        assert_eq!(trim_number_str("010.500"), "10.5");
        assert_eq!(trim_number_str("+5"), "5");
        assert_eq!(trim_number_str("-0.0"), "0");
        assert_eq!(trim_number_str(".5"), "0.5");
        assert_eq!(trim_number_str("-00.25"), "-0.25");
    }

    #[test]
    fn compact_drops_line_numbers() {
        let words = parse_words("N10 G1 X1.0 Y2.00");
        assert_eq!(build_compact_line(&words), "G1X1Y2");
    }

    #[test]
    fn compact_is_idempotent() {
        let first = build_compact_line(&parse_words("G01 X010.100 Y2."));
        let second = build_compact_line(&parse_words(&first));
        assert_eq!(first, second);
    }

    #[test]
    fn format_float_rounds_and_trims() {
        assert_eq!(format_float(1.25, 3), "1.25");
        assert_eq!(format_float(-0.00004, 3), "0");
        assert_eq!(format_float(10.0, 4), "10");
    }

    #[test]
    fn safe_word_line_detection() {
        assert!(is_safe_word_line("G1X1Y2"));
        assert!(!is_safe_word_line("$H"));
        assert!(!is_safe_word_line("G1 X[var]"));
    }
}
