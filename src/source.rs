//! Local mail sources: an MBOX file or a directory of `.eml` files.
//!
//! Network retrieval (IMAP and friends) lives outside this crate; anything
//! that can produce [`RawMessage`]s can implement [`MessageSource`].

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::model::RawMessage;

/// Size of the internal read buffer.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Messages larger than this are truncated (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Supplies raw messages in source order.
pub trait MessageSource {
    /// Read every message. An empty list is not an error here; the pipeline
    /// decides what "no messages" means.
    fn messages(&mut self) -> anyhow::Result<Vec<RawMessage>>;
}

/// Open `path` as a directory of `.eml` files or as an MBOX file.
pub fn open_source(path: &Path) -> anyhow::Result<Box<dyn MessageSource>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Cannot open mail source {}", path.display()))?;
    if metadata.is_dir() {
        Ok(Box::new(EmlDirSource::new(path)))
    } else {
        Ok(Box::new(MboxSource::new(path)))
    }
}

/// Streaming MBOX reader.
///
/// Reads line by line, splitting on `From ` separator lines, which are
/// dropped from the message bytes. Tolerant of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - A UTF-8 BOM at the start of the file
/// - `>From ` quoting (mboxrd), which is undone
#[derive(Debug)]
pub struct MboxSource {
    path: PathBuf,
    max_message_size: usize,
}

impl MboxSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl MessageSource for MboxSource {
    fn messages(&mut self) -> anyhow::Result<Vec<RawMessage>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Cannot open mailbox {}", self.path.display()))?;
        let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut messages = Vec::new();
        let mut current: Option<Vec<u8>> = None;
        let mut line: Vec<u8> = Vec::with_capacity(4096);
        let mut prev_line_was_empty = true;
        let mut first_line = true;
        let mut truncated = false;
        let mut offset: u64 = 0;

        loop {
            line.clear();
            let n = reader
                .read_until(b'\n', &mut line)
                .with_context(|| format!("Error reading {}", self.path.display()))?;
            if n == 0 {
                break;
            }

            let content = if first_line {
                line.strip_prefix(UTF8_BOM).unwrap_or(&line)
            } else {
                &line[..]
            };

            if content.starts_with(b"From ") {
                if !first_line && !prev_line_was_empty {
                    warn!(offset = offset, "Found 'From ' separator without preceding blank line");
                }
                if let Some(done) = current.take() {
                    messages.push(RawMessage::new(trim_separator_gap(done)));
                }
                current = Some(Vec::with_capacity(64 * 1024));
                truncated = false;
            } else if !truncated {
                let buf = current.get_or_insert_with(Vec::new);
                let unquoted = unquote_from(content);
                if buf.len() + unquoted.len() <= self.max_message_size {
                    buf.extend_from_slice(unquoted);
                } else {
                    warn!(
                        offset = offset,
                        max_size = self.max_message_size,
                        "Message exceeds maximum size, truncating body"
                    );
                    truncated = true;
                }
            }

            prev_line_was_empty = is_blank_line(content);
            first_line = false;
            offset += n as u64;
        }

        if let Some(done) = current.take() {
            messages.push(RawMessage::new(trim_separator_gap(done)));
        }
        messages.retain(|m| !m.bytes.iter().all(u8::is_ascii_whitespace));

        debug!(path = %self.path.display(), count = messages.len(), "Read mailbox");
        Ok(messages)
    }
}

/// A directory of `.eml` files, read in file-name order.
#[derive(Debug)]
pub struct EmlDirSource {
    dir: PathBuf,
}

impl EmlDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MessageSource for EmlDirSource {
    fn messages(&mut self) -> anyhow::Result<Vec<RawMessage>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot read directory {}", self.dir.display()))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Cannot list {}", self.dir.display()))?
                .path();
            let is_eml = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));
            if is_eml && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut messages = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes =
                std::fs::read(&path).with_context(|| format!("Cannot read {}", path.display()))?;
            messages.push(RawMessage::new(bytes));
        }

        debug!(dir = %self.dir.display(), count = messages.len(), "Read .eml directory");
        Ok(messages)
    }
}

/// Undo mboxrd quoting: `>From `, `>>From `, ... lose one `>`.
fn unquote_from(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}

/// Drop the single blank line that separates a message from the next
/// `From ` line.
fn trim_separator_gap(mut bytes: Vec<u8>) -> Vec<u8> {
    if bytes.ends_with(b"\r\n\r\n") {
        bytes.truncate(bytes.len() - 2);
    } else if bytes.ends_with(b"\n\n") {
        bytes.truncate(bytes.len() - 1);
    }
    bytes
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}
