//! Incremental reader for tailing a live session log.
//!
//! The writer appends whole lines and flushes, but a poll can still land
//! mid-write. The reader therefore consumes only newline-terminated lines: a
//! partial tail is left unconsumed and picked up complete on the next poll.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use colloquy_proto::Record;
use serde::Serialize;
use tracing::warn;

/// Result of one poll: parsed records plus any lines that failed to parse.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub records: Vec<Record>,
    pub malformed: Vec<MalformedLine>,
}

/// A log line that failed to parse.
#[derive(Debug, Clone, Serialize)]
pub struct MalformedLine {
    /// Line number in the file (1-indexed).
    pub line_number: u64,
    /// The raw content that failed to parse (truncated if very long).
    pub content: String,
    /// The parse error message.
    pub error: String,
}

impl MalformedLine {
    const MAX_CONTENT_LEN: usize = 100;

    fn new(line_number: u64, content: &str, error: String) -> Self {
        let content = if content.len() > Self::MAX_CONTENT_LEN {
            // Round the cut down to a char boundary; a multi-byte character
            // straddling the limit must not panic the reader.
            let mut end = Self::MAX_CONTENT_LEN;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &content[..end])
        } else {
            content.to_string()
        };
        Self {
            line_number,
            content,
            error,
        }
    }
}

/// Reads new records from a session log since the last read.
pub struct LogReader {
    path: PathBuf,
    position: u64,
    line_number: u64,
}

impl LogReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            position: 0,
            line_number: 0,
        }
    }

    /// Reads records appended since the last call.
    ///
    /// A missing file yields an empty result rather than an error, since the
    /// viewer may start before the session does. Unparsable lines are
    /// captured as [`MalformedLine`]s, never fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened or read.
    pub fn read_new(&mut self) -> std::io::Result<ParseResult> {
        if !self.path.exists() {
            return Ok(ParseResult::default());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.position))?;
        let mut reader = BufReader::new(file);

        let mut result = ParseResult::default();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            if buf.last() != Some(&b'\n') {
                // Partial tail mid-append. Leave it for the next poll.
                break;
            }
            self.position += n as u64;
            self.line_number += 1;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches('\n');
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(line) {
                Ok(record) => result.records.push(record),
                Err(e) => {
                    warn!(error = %e, line_number = self.line_number, "malformed log line");
                    result
                        .malformed
                        .push(MalformedLine::new(self.line_number, line, e.to_string()));
                }
            }
        }
        Ok(result)
    }

    /// The byte position of the next read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Rewinds to the start of the file, so the next read replays everything.
    pub fn reset(&mut self) {
        self.position = 0;
        self.line_number = 0;
    }
}
