//! Job line sources.
//!
//! A processed job is either held in memory or materialized to a temp file
//! with a byte-offset index and a bounded read window, so very large jobs
//! never pin the whole file in RAM.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use simplesender_core::Result;
use tempfile::TempPath;

/// Lines kept in the sliding window of a file-backed source.
const WINDOW_CAPACITY: usize = 256;

/// One processed job line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Line text without terminator, already within the byte policy.
    pub text: String,
    /// 1-based line number within the processed job.
    pub number: usize,
    /// 1-based line number in the original file, when known.
    ///
    /// Split sub-segments share their parent's number.
    pub source_line: Option<usize>,
}

/// A loaded job: the line source plus its display name.
#[derive(Debug)]
pub struct Job {
    /// Display name for error reporting (usually the file stem).
    pub name: Option<String>,
    /// The line feed.
    pub source: JobSource,
}

impl Job {
    /// Number of dispatchable lines.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// True when the job has no lines.
    pub fn is_empty(&self) -> bool {
        self.source.len() == 0
    }

    /// Fetch one line by zero-based index.
    pub fn get(&self, index: usize) -> Option<Line> {
        self.source.get(index)
    }
}

/// Indexed, seekable feed of processed job lines.
#[derive(Debug)]
pub enum JobSource {
    /// Whole job held in memory.
    InMemory(Vec<Line>),
    /// Job persisted to a processed temp file with an offset index.
    StreamingFile(FileJobSource),
}

impl JobSource {
    /// Number of lines.
    pub fn len(&self) -> usize {
        match self {
            Self::InMemory(lines) => lines.len(),
            Self::StreamingFile(f) => f.len(),
        }
    }

    /// True when the source has no lines.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch one line by zero-based index.
    pub fn get(&self, index: usize) -> Option<Line> {
        match self {
            Self::InMemory(lines) => lines.get(index).cloned(),
            Self::StreamingFile(f) => f.get(index),
        }
    }

    /// Iterate lines starting at a zero-based index.
    pub fn iter_from(&self, start: usize) -> JobIter<'_> {
        JobIter {
            source: self,
            next: start,
        }
    }
}

/// Iterator over job lines.
pub struct JobIter<'a> {
    source: &'a JobSource,
    next: usize,
}

impl Iterator for JobIter<'_> {
    type Item = Line;

    fn next(&mut self) -> Option<Line> {
        let line = self.source.get(self.next)?;
        self.next += 1;
        Some(line)
    }
}

/// Offset-index entry for one processed line.
#[derive(Debug, Clone, Copy)]
pub struct LineOffset {
    /// Byte offset of the line start in the processed file.
    pub offset: u64,
    /// 1-based original-file line number.
    pub source_line: usize,
}

#[derive(Debug)]
struct ReadWindow {
    reader: Option<BufReader<File>>,
    /// Index of the first cached line.
    start: usize,
    lines: VecDeque<String>,
}

/// Lazy line source backed by a processed temp file and precomputed offsets.
#[derive(Debug)]
pub struct FileJobSource {
    path: PathBuf,
    offsets: Vec<LineOffset>,
    window: Mutex<ReadWindow>,
    /// Owns the temp file; dropping the source removes it.
    _temp: Option<TempPath>,
}

impl FileJobSource {
    /// Wrap a processed file and its offset index.
    ///
    /// `temp` keeps the backing temp file alive for the source's lifetime.
    pub fn new(path: impl Into<PathBuf>, offsets: Vec<LineOffset>, temp: Option<TempPath>) -> Self {
        Self {
            path: path.into(),
            offsets,
            window: Mutex::new(ReadWindow {
                reader: None,
                start: 0,
                lines: VecDeque::new(),
            }),
            _temp: temp,
        }
    }

    /// Path of the processed file (used by the modal pre-scanner).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of indexed lines.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True when the index is empty.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Fetch one line, serving repeat reads from the sliding window.
    pub fn get(&self, index: usize) -> Option<Line> {
        if index >= self.offsets.len() {
            return None;
        }
        let entry = self.offsets[index];
        let mut window = self.window.lock();
        if index >= window.start && index < window.start + window.lines.len() {
            let text = window.lines[index - window.start].clone();
            return Some(Line {
                text,
                number: index + 1,
                source_line: Some(entry.source_line),
            });
        }
        let text = match self.read_at(&mut window, index, entry.offset) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!("Failed to read job line {}: {}", index + 1, err);
                return None;
            }
        };
        Some(Line {
            text,
            number: index + 1,
            source_line: Some(entry.source_line),
        })
    }

    fn read_at(&self, window: &mut ReadWindow, index: usize, offset: u64) -> Result<String> {
        if window.reader.is_none() {
            let file = File::open(&self.path)?;
            window.reader = Some(BufReader::new(file));
        }
        let reader = window.reader.as_mut().expect("reader just installed");
        reader.seek(SeekFrom::Start(offset))?;
        let mut text = String::new();
        reader.read_line(&mut text)?;
        while text.ends_with('\n') || text.ends_with('\r') {
            text.pop();
        }
        // Sequential access resets the window; random access just caches
        // the single line.
        if window.start + window.lines.len() == index {
            window.lines.push_back(text.clone());
            if window.lines.len() > WINDOW_CAPACITY {
                window.lines.pop_front();
                window.start += 1;
            }
        } else {
            window.lines.clear();
            window.lines.push_back(text.clone());
            window.start = index;
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_source(lines: &[&str]) -> FileJobSource {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        let mut offsets = Vec::new();
        let mut pos = 0u64;
        for (i, line) in lines.iter().enumerate() {
            offsets.push(LineOffset {
                offset: pos,
                source_line: i + 1,
            });
            writeln!(tmp, "{line}").expect("write line");
            pos += line.len() as u64 + 1;
        }
        tmp.flush().expect("flush");
        let (_, path) = tmp.keep().expect("keep temp");
        let p = path.to_path_buf();
        FileJobSource::new(p, offsets, Some(TempPath::from_path(path)))
    }

    #[test]
    fn file_source_random_access() {
        let src = file_source(&["G21", "G90", "G1X5", "G1X10"]);
        assert_eq!(src.len(), 4);
        assert_eq!(src.get(2).unwrap().text, "G1X5");
        assert_eq!(src.get(0).unwrap().text, "G21");
        assert_eq!(src.get(3).unwrap().number, 4);
        assert!(src.get(4).is_none());
    }

    #[test]
    fn iter_from_walks_sequentially() {
        let lines = ["G21", "G90", "G1X5", "G1X10"];
        let src = JobSource::StreamingFile(file_source(&lines));
        let collected: Vec<String> = src.iter_from(1).map(|l| l.text).collect();
        assert_eq!(collected, ["G90", "G1X5", "G1X10"]);
    }
}
