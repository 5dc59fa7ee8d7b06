//! Job loading pipeline.
//!
//! Cleans raw input, rejects `$` system commands and non-ASCII bytes,
//! enforces the byte policy through [`LineSplitter`], and materializes
//! large jobs to an indexed temp file so memory stays bounded.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;

use simplesender_core::constants::{STREAMING_LINE_THRESHOLD, STREAMING_SIZE_THRESHOLD};
use simplesender_core::LoadError;

use crate::cleaner::{clean_gcode_line, is_clean_ascii};
use crate::source::{FileJobSource, Job, JobSource, Line, LineOffset};
use crate::splitter::{LineSplitter, SplitLine};

/// Loader tuning knobs.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Job name used in stream error reports.
    pub name: Option<String>,
    /// Cleaned-line count that switches the loader to streaming mode.
    pub streaming_line_threshold: usize,
    /// Raw byte size that switches the loader to streaming mode.
    pub streaming_size_threshold: u64,
    /// Force streaming mode regardless of thresholds.
    pub force_streaming: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            name: None,
            streaming_line_threshold: STREAMING_LINE_THRESHOLD,
            streaming_size_threshold: STREAMING_SIZE_THRESHOLD,
            force_streaming: false,
        }
    }
}

/// Statistics from a completed load.
#[derive(Debug, Clone, Default)]
pub struct LoadStats {
    /// Raw lines read from the input.
    pub input_lines: usize,
    /// Non-empty cleaned lines.
    pub cleaned_lines: usize,
    /// Processed output lines.
    pub output_lines: usize,
    /// Input lines split into sub-segments.
    pub split_count: usize,
    /// Input lines whose text changed.
    pub modified_count: usize,
    /// Whether the job went to a temp file.
    pub streaming: bool,
}

/// A processed, dispatchable job plus its load statistics.
#[derive(Debug)]
pub struct LoadedJob {
    /// The job handed to the streaming controller.
    pub job: Job,
    /// Pipeline statistics.
    pub stats: LoadStats,
}

/// Load a job from a file path.
pub fn load_job_from_path(path: &Path, options: LoadOptions) -> Result<LoadedJob, LoadError> {
    let file = File::open(path)?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    let mut reader = BufReader::new(file);

    let name = options.name.clone().or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });
    let options = LoadOptions { name, ..options };

    if options.force_streaming || size >= options.streaming_size_threshold {
        return load_streaming(&mut reader, options);
    }

    // Small file: pull it in, decode lossily (the per-line ASCII check
    // reports the precise offender), and count lines for the threshold.
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let bytes = strip_bom(&bytes);
    let text = String::from_utf8_lossy(bytes);
    let line_count = text.lines().count();
    if line_count >= options.streaming_line_threshold {
        tracing::info!("Large job ({} lines); using streaming mode", line_count);
        let mut reader = BufReader::new(text.as_bytes());
        return load_streaming(&mut reader, options);
    }
    load_job_from_lines(text.lines(), options)
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes)
}

/// Load a job from lines already in memory.
///
/// This is also the path auto-level output takes: synthesized G-code is
/// re-validated against the same byte policy before it becomes the active
/// job. Switches to a temp file when the cleaned-line threshold is hit.
pub fn load_job_from_lines<'a, I>(lines: I, options: LoadOptions) -> Result<LoadedJob, LoadError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut splitter = LineSplitter::new();
    let mut out: Vec<Line> = Vec::new();
    let mut stats = LoadStats::default();

    for (idx, raw) in lines.into_iter().enumerate() {
        let source_line = idx + 1;
        stats.input_lines += 1;
        let cleaned = clean_line(raw, source_line)?;
        if cleaned.is_empty() {
            continue;
        }
        stats.cleaned_lines += 1;
        let mut sink = |l: SplitLine| {
            out.push(Line {
                text: l.text,
                number: 0,
                source_line: Some(l.source_line),
            });
        };
        splitter.push(source_line, &cleaned, &mut sink)?;
    }

    for (i, line) in out.iter_mut().enumerate() {
        line.number = i + 1;
    }
    stats.output_lines = out.len();
    stats.split_count = splitter.split_count();
    stats.modified_count = splitter.modified_count();

    if stats.split_count > 0 {
        tracing::info!(
            "Byte policy: {} line(s) split, {} modified",
            stats.split_count,
            stats.modified_count
        );
    }

    Ok(LoadedJob {
        job: Job {
            name: options.name,
            source: JobSource::InMemory(out),
        },
        stats,
    })
}

fn clean_line(raw: &str, source_line: usize) -> Result<String, LoadError> {
    let cleaned = clean_gcode_line(raw);
    if cleaned.is_empty() {
        return Ok(cleaned);
    }
    if !is_clean_ascii(&cleaned) {
        return Err(LoadError::NonAscii { line: source_line });
    }
    if cleaned.starts_with('$') {
        return Err(LoadError::SystemCommandInJob {
            line: source_line,
            text: cleaned,
        });
    }
    Ok(cleaned)
}

fn load_streaming<R: BufRead>(reader: &mut R, options: LoadOptions) -> Result<LoadedJob, LoadError> {
    let mut temp = tempfile::Builder::new()
        .prefix("simple_sender_stream_")
        .suffix(".gcode")
        .tempfile()
        .map_err(|e| LoadError::NotWritableForTemp {
            reason: e.to_string(),
        })?;

    let mut splitter = LineSplitter::new();
    let mut offsets: Vec<LineOffset> = Vec::new();
    let mut stats = LoadStats {
        streaming: true,
        ..Default::default()
    };

    let mut pos: u64 = 0;
    let mut raw_bytes: Vec<u8> = Vec::new();
    let mut write_error: Option<std::io::Error> = None;
    loop {
        raw_bytes.clear();
        let n = reader.read_until(b'\n', &mut raw_bytes)?;
        if n == 0 {
            break;
        }
        stats.input_lines += 1;
        let source_line = stats.input_lines;
        let raw = String::from_utf8_lossy(&raw_bytes);
        let cleaned = clean_line(&raw, source_line)?;
        if cleaned.is_empty() {
            continue;
        }
        stats.cleaned_lines += 1;
        {
            let file = temp.as_file_mut();
            let mut sink = |l: SplitLine| {
                if write_error.is_some() {
                    return;
                }
                offsets.push(LineOffset {
                    offset: pos,
                    source_line: l.source_line,
                });
                if let Err(e) = file
                    .write_all(l.text.as_bytes())
                    .and_then(|_| file.write_all(b"\n"))
                {
                    write_error = Some(e);
                    return;
                }
                pos += l.text.len() as u64 + 1;
            };
            splitter.push(source_line, &cleaned, &mut sink)?;
        }
        if let Some(e) = write_error.take() {
            return Err(LoadError::NotWritableForTemp {
                reason: e.to_string(),
            });
        }
    }
    temp.as_file_mut()
        .flush()
        .map_err(|e| LoadError::NotWritableForTemp {
            reason: e.to_string(),
        })?;

    stats.output_lines = offsets.len();
    stats.split_count = splitter.split_count();
    stats.modified_count = splitter.modified_count();

    let temp_path = temp.into_temp_path();
    let path = temp_path.to_path_buf();
    tracing::info!(
        "Streaming job materialized: {} lines at {}",
        stats.output_lines,
        path.display()
    );

    Ok(LoadedJob {
        job: Job {
            name: options.name,
            source: JobSource::StreamingFile(FileJobSource::new(path, offsets, Some(temp_path))),
        },
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_cleans_and_numbers() {
        let input = "G21 ; metric\n\n(setup)\nG90\nG1 X5 Y5 F500\n";
        let loaded = load_job_from_lines(input.lines(), LoadOptions::default()).unwrap();
        let lines: Vec<Line> = loaded.job.source.iter_from(0).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "G21");
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[0].source_line, Some(1));
        assert_eq!(lines[2].text, "G1X5Y5F500");
        assert_eq!(lines[2].source_line, Some(5));
        assert_eq!(loaded.stats.input_lines, 5);
        assert_eq!(loaded.stats.cleaned_lines, 3);
    }

    #[test]
    fn rejects_system_commands() {
        let err = load_job_from_lines("G21\n$H\n".lines(), LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::SystemCommandInJob { line: 2, .. }));
    }

    #[test]
    fn rejects_non_ascii() {
        let err = load_job_from_lines("G21\nG1 Xü5\n".lines(), LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::NonAscii { line: 2 }));
    }

    #[test]
    fn normalized_output_is_idempotent() {
        let input = "N10 G01 X010.100 Y2.00\nN20 G1 X3. Y4.50\n";
        let first = load_job_from_lines(input.lines(), LoadOptions::default()).unwrap();
        let emitted: Vec<String> = first.job.source.iter_from(0).map(|l| l.text).collect();
        let joined = emitted.join("\n");
        let second = load_job_from_lines(joined.lines(), LoadOptions::default()).unwrap();
        let emitted_again: Vec<String> = second.job.source.iter_from(0).map(|l| l.text).collect();
        assert_eq!(emitted, emitted_again);
    }
}
