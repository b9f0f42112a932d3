//! Content-addressed asset storage.
//!
//! An asset's identity is the SHA-256 of its bytes, so the same image sent in
//! two different messages resolves to one file:
//!
//! ```text
//! <publish_dir>/<static_prefix>/<sha256>.<ext>     (on disk)
//! <base_uri><static_prefix>/<sha256>.<ext>         (public URI)
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::PublishConfig;
use crate::error::{PressError, Result};
use crate::model::Image;

/// MIME types we publish as images, with their file extensions.
const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", "jpeg"),
    ("image/jpg", "jpeg"),
    ("image/pjpeg", "jpeg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/svg+xml", "svg"),
    ("image/avif", "avif"),
    ("image/heic", "heic"),
    ("image/x-icon", "ico"),
    ("image/vnd.microsoft.icon", "ico"),
];

/// Distinguishes temp files of concurrent writers within one process.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Result of [`AssetStore::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The file was (re)written.
    Written,
    /// The file already existed and overwriting was not requested.
    Skipped,
}

/// Resolves and writes content-addressed assets.
#[derive(Debug, Clone)]
pub struct AssetStore {
    base_uri: String,
    static_prefix: String,
    publish_dir: PathBuf,
}

impl AssetStore {
    /// Create a store from explicit locations.
    pub fn new(
        base_uri: impl Into<String>,
        static_prefix: impl Into<String>,
        publish_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_uri: base_uri.into(),
            static_prefix: normalize_prefix(&static_prefix.into()),
            publish_dir: publish_dir.into(),
        }
    }

    /// Create a store from the `[publish]` config section.
    pub fn from_config(config: &PublishConfig) -> Self {
        Self::new(
            config.base_uri.clone(),
            config.static_prefix.clone(),
            config.publish_dir.clone(),
        )
    }

    /// Content identity of a byte sequence: lowercase hex SHA-256.
    pub fn identify(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// File extension for a supported image MIME type.
    pub fn extension_for_mime(mime: &str) -> Result<&'static str> {
        let wanted = mime.trim();
        MIME_EXTENSIONS
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(wanted))
            .map(|(_, ext)| *ext)
            .ok_or_else(|| PressError::UnknownMimeType(wanted.to_string()))
    }

    /// Directory holding all static assets.
    pub fn static_dir(&self) -> PathBuf {
        self.publish_dir
            .join(self.static_prefix.trim_start_matches('/'))
    }

    /// On-disk location of an asset.
    pub fn resolve_path(&self, id: &str, extension: &str) -> PathBuf {
        self.static_dir().join(format!("{id}.{extension}"))
    }

    /// Public URI of an asset.
    pub fn resolve_uri(&self, id: &str, extension: &str) -> String {
        format!(
            "{}{}/{id}.{extension}",
            self.base_uri, self.static_prefix
        )
    }

    /// Write an asset unless it already exists (or `overwrite` is set).
    ///
    /// Bytes go to a temporary sibling first and are renamed into place, so
    /// concurrent writers of the same content never leave a torn file behind.
    pub fn persist(
        &self,
        id: &str,
        bytes: &[u8],
        extension: &str,
        overwrite: bool,
    ) -> Result<PersistOutcome> {
        let path = self.resolve_path(id, extension);
        if !overwrite && path.is_file() {
            debug!(path = %path.display(), "Asset already present");
            return Ok(PersistOutcome::Skipped);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| asset_write(parent, e))?;
        }

        let tmp = temp_path_for(&path);
        if let Err(e) = write_file(&tmp, bytes) {
            let _ = std::fs::remove_file(&tmp);
            return Err(asset_write(&path, e));
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(asset_write(&path, e));
        }

        debug!(path = %path.display(), size = bytes.len(), "Asset written");
        Ok(PersistOutcome::Written)
    }

    /// Persist an [`Image`] at its resolved location.
    pub fn persist_image(&self, image: &Image, overwrite: bool) -> Result<PersistOutcome> {
        self.persist(&image.id, &image.data, &image.extension, overwrite)
    }
}

/// Ensure the prefix starts with `/` and has no trailing `/` (`""` stays empty).
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()
}

fn asset_write(path: &Path, source: std::io::Error) -> PressError {
    PressError::AssetWrite {
        path: path.to_path_buf(),
        source,
    }
}
