//! Macro file discovery and headers.
//!
//! Slots `Macro-1`…`Macro-8` (optional `.txt`) are resolved through an
//! ordered search-path list, leftmost wins. The first four lines are the
//! header: label, tooltip, optional button color, optional text color;
//! the body starts at line 5.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

use simplesender_core::Result;

const MACRO_PREFIX: &str = "Macro-";
const MACRO_EXTS: [&str; 2] = ["", ".txt"];

/// Header lines before the body.
pub const HEADER_LINES: usize = 4;

static HEX_COLOR_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("hex color pattern"));
static COLOR_PREFIX_PAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*color\s*[:=]\s*(.*?)\s*$").expect("color prefix pattern"));
static TEXT_COLOR_PREFIX_PAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:text[_\s-]*color|foreground|fg)\s*[:=]\s*(.*?)\s*$")
        .expect("text color prefix pattern")
});

/// A parsed macro file.
#[derive(Debug, Clone)]
pub struct MacroFile {
    /// Slot number (1-8).
    pub index: u8,
    /// Resolved path.
    pub path: PathBuf,
    /// Button label (header line 1).
    pub label: String,
    /// Tooltip (header line 2).
    pub tooltip: String,
    /// Button background color (header line 3, validated).
    pub button_color: Option<String>,
    /// Button text color (header line 4, validated).
    pub text_color: Option<String>,
    /// Body lines (from line 5).
    pub body: Vec<String>,
}

fn is_valid_color(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    if HEX_COLOR_PAT.is_match(token) {
        return true;
    }
    // Named colors: a single alphabetic word (the UI toolkit validates
    // the actual name).
    token.chars().all(|c| c.is_ascii_alphabetic())
}

/// Parse one color header line.
///
/// Accepts a bare color token or a `color: <token>` prefix; returns
/// `None` for non-blank invalid lines, `Some("")` for blank ones.
fn parse_color_line(line: &str, text_color: bool) -> Option<String> {
    let raw = line.trim();
    if raw.is_empty() {
        return Some(String::new());
    }
    let pat = if text_color {
        &TEXT_COLOR_PREFIX_PAT
    } else {
        &COLOR_PREFIX_PAT
    };
    let token = pat
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(raw);
    if is_valid_color(token) {
        Some(token.to_string())
    } else {
        None
    }
}

/// Find the file for a macro slot across the search paths.
///
/// The leftmost directory containing `Macro-N` or `Macro-N.txt` wins.
pub fn find_macro_file(search_paths: &[PathBuf], index: u8) -> Option<PathBuf> {
    for dir in search_paths {
        for ext in MACRO_EXTS {
            let candidate = dir.join(format!("{}{}{}", MACRO_PREFIX, index, ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Load and parse one macro file.
pub fn load_macro(index: u8, path: &Path) -> Result<MacroFile> {
    let text = fs::read_to_string(path)?;
    let lines: Vec<&str> = text.lines().collect();

    let label = lines
        .first()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| format!("Macro {}", index));
    let tooltip = lines.get(1).map(|l| l.trim().to_string()).unwrap_or_default();
    let button_color = lines
        .get(2)
        .and_then(|l| parse_color_line(l, false))
        .filter(|c| !c.is_empty());
    let text_color = lines
        .get(3)
        .and_then(|l| parse_color_line(l, true))
        .filter(|c| !c.is_empty());
    let body = lines
        .iter()
        .skip(HEADER_LINES)
        .map(|l| l.to_string())
        .collect();

    Ok(MacroFile {
        index,
        path: path.to_path_buf(),
        label,
        tooltip,
        button_color,
        text_color,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_macro(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn leftmost_search_path_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        write_macro(b.path(), "Macro-1", "B\n\n\n\nG21\n");
        let found = find_macro_file(&[a.path().to_path_buf(), b.path().to_path_buf()], 1).unwrap();
        assert!(found.starts_with(b.path()));

        write_macro(a.path(), "Macro-1.txt", "A\n\n\n\nG21\n");
        let found = find_macro_file(&[a.path().to_path_buf(), b.path().to_path_buf()], 1).unwrap();
        assert!(found.starts_with(a.path()));
    }

    #[test]
    fn parses_header_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_macro(
            dir.path(),
            "Macro-3",
            "Probe Z\nTouch off the Z axis\ncolor: #3355ff\nwhite\nG21\nG38.2 Z-10 F50\n",
        );
        let m = load_macro(3, &path).unwrap();
        assert_eq!(m.label, "Probe Z");
        assert_eq!(m.tooltip, "Touch off the Z axis");
        assert_eq!(m.button_color.as_deref(), Some("#3355ff"));
        assert_eq!(m.text_color.as_deref(), Some("white"));
        assert_eq!(m.body, vec!["G21".to_string(), "G38.2 Z-10 F50".to_string()]);
    }

    #[test]
    fn invalid_color_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_macro(dir.path(), "Macro-2", "M\n\n#12\n\nG21\n");
        let m = load_macro(2, &path).unwrap();
        assert_eq!(m.button_color, None);
    }
}
