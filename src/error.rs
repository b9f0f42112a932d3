//! Centralized error types for mailpress.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailpress library.
///
/// Most of these are per-item: the pipeline reports them and moves on.
/// Only [`PressError::NoMessages`] and [`PressError::Cancelled`] end a run.
#[derive(Error, Debug)]
pub enum PressError {
    /// The raw bytes are not a usable RFC 5322 message.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// A single MIME leaf part could not be decoded.
    #[error("Malformed MIME part {part}: {reason}")]
    MalformedPart { part: usize, reason: String },

    /// An HTML body could not be parsed.
    #[error("Cannot sanitize HTML body: {0}")]
    UnsanitizableHtml(String),

    /// An asset has a MIME type with no known file extension.
    #[error("No file extension known for MIME type '{0}'")]
    UnknownMimeType(String),

    /// Writing an asset to the publish directory failed.
    #[error("Failed to write asset '{path}': {source}")]
    AssetWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Fetching or reading a link preview failed.
    #[error("Preview fetch failed for {url}: {reason}")]
    PreviewFetch { url: String, reason: String },

    /// A message in a batch failed and was excluded from the output.
    #[error("Message #{index} skipped: {source}")]
    BatchItem {
        index: usize,
        #[source]
        source: Box<PressError>,
    },

    /// The mail source produced no messages at all.
    #[error("No messages available from the mail source")]
    NoMessages,

    /// The run was cancelled before it could produce anything.
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The snapshot file is corrupt or not a mailpress snapshot.
    #[error("Invalid snapshot: {0}")]
    Snapshot(String),

    /// The configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias for `Result<T, PressError>`.
pub type Result<T> = std::result::Result<T, PressError>;

impl PressError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap a per-message failure with its position in the batch.
    pub fn batch_item(index: usize, source: PressError) -> Self {
        Self::BatchItem {
            index,
            source: Box::new(source),
        }
    }
}
