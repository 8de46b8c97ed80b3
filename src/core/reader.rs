// File: src/core/reader.rs
use crate::core::types::{DictionarySource, Entry, DEFAULT_FREQUENCY};
use crate::error::{CompileError, Result};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::debug;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Outcome of parsing a single dictionary line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedLine {
    Entry(Entry),
    /// The frequency field was present but not a non-negative base-10 integer.
    DefaultedEntry(Entry),
    /// Fewer than three whitespace-separated fields.
    Skipped,
}

/// Parses `word <ignored> frequency [...]`. Fields are separated by runs of whitespace.
pub fn parse_line(line: &str) -> ParsedLine {
    let mut fields = line.split_whitespace();
    let (Some(word), Some(_), Some(freq)) = (fields.next(), fields.next(), fields.next()) else {
        return ParsedLine::Skipped;
    };
    match freq.parse::<u64>() {
        Ok(frequency) => ParsedLine::Entry(Entry::new(word, frequency)),
        Err(_) => ParsedLine::DefaultedEntry(Entry::new(word, DEFAULT_FREQUENCY)),
    }
}

/// A single forward pass over a line-oriented UTF-8 dictionary.
///
/// Yields `Err` only for I/O failures, which the caller must treat as fatal.
/// Malformed lines are skipped and bad frequencies default to 1. Invalid UTF-8
/// is replaced with U+FFFD and the line is still parsed. All three are counted.
pub struct DictionaryReader<R> {
    reader: R,
    buf: Vec<u8>,
    path: PathBuf,
    line_no: usize,
    skipped_lines: u64,
    defaulted_frequencies: u64,
    lossy_lines: u64,
    failed: bool,
}

impl DictionaryReader<BufReader<File>> {
    pub fn open(source: &DictionarySource) -> Result<Self> {
        let file = File::open(&source.path)
            .map_err(|e| CompileError::source_read(&source.path, e))?;
        Ok(Self::from_reader(BufReader::new(file), &source.path))
    }
}

impl<R: BufRead> DictionaryReader<R> {
    pub fn from_reader(reader: R, path: &Path) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            path: path.to_path_buf(),
            line_no: 0,
            skipped_lines: 0,
            defaulted_frequencies: 0,
            lossy_lines: 0,
            failed: false,
        }
    }

    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    pub fn defaulted_frequencies(&self) -> u64 {
        self.defaulted_frequencies
    }

    /// Lines that contained invalid UTF-8 and were decoded with replacement characters.
    pub fn lossy_lines(&self) -> u64 {
        self.lossy_lines
    }
}

impl<R: BufRead> Iterator for DictionaryReader<R> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(CompileError::source_read(&self.path, e)));
                }
            }
            self.line_no += 1;

            let line = String::from_utf8_lossy(&self.buf);
            if matches!(line, Cow::Owned(_)) {
                self.lossy_lines += 1;
                debug!(path = %self.path.display(), line = self.line_no, "replaced invalid UTF-8");
            }
            let text = if self.line_no == 1 {
                line.strip_prefix(BYTE_ORDER_MARK).unwrap_or(&line)
            } else {
                &line
            };

            match parse_line(text) {
                ParsedLine::Entry(entry) => return Some(Ok(entry)),
                ParsedLine::DefaultedEntry(entry) => {
                    self.defaulted_frequencies += 1;
                    return Some(Ok(entry));
                }
                ParsedLine::Skipped => {
                    self.skipped_lines += 1;
                    if !text.trim().is_empty() {
                        debug!(path = %self.path.display(), line = self.line_no, "skipping line with fewer than three fields");
                    }
                }
            }
        }
    }
}
