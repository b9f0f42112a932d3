//! Versioned snapshot of a post collection.
//!
//! ```text
//! {
//!   "format":  "mailpress-snapshot",
//!   "version": 1,
//!   "posts":   [ Post, ... ]      // binary payloads base64-encoded
//! }
//! ```
//!
//! Decoding is forward compatible: unknown fields are ignored and missing
//! ones take their defaults. A snapshot from a newer version is still
//! decoded, with a warning.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PressError, Result};
use crate::model::Post;

/// Format tag identifying a mailpress snapshot.
pub const FORMAT: &str = "mailpress-snapshot";

/// Current snapshot schema version.
pub const VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    format: &'a str,
    version: u32,
    posts: &'a [Post],
}

#[derive(Deserialize)]
struct SnapshotIn {
    #[serde(default)]
    format: String,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    posts: Vec<Post>,
}

/// Serialize posts to snapshot JSON.
pub fn encode(posts: &[Post]) -> Result<Vec<u8>> {
    let snapshot = SnapshotOut {
        format: FORMAT,
        version: VERSION,
        posts,
    };
    serde_json::to_vec_pretty(&snapshot).map_err(|e| PressError::Snapshot(e.to_string()))
}

/// Parse snapshot JSON back into posts.
pub fn decode(bytes: &[u8]) -> Result<Vec<Post>> {
    let snapshot: SnapshotIn =
        serde_json::from_slice(bytes).map_err(|e| PressError::Snapshot(e.to_string()))?;

    if snapshot.format != FORMAT {
        return Err(PressError::Snapshot(format!(
            "unexpected format tag '{}'",
            snapshot.format
        )));
    }
    if snapshot.version > VERSION {
        warn!(
            found = snapshot.version,
            supported = VERSION,
            "Snapshot written by a newer version, fields may be missing"
        );
    }
    Ok(snapshot.posts)
}

/// Write a snapshot file, replacing any previous one atomically.
pub fn save_snapshot(path: &Path, posts: &[Post]) -> Result<()> {
    let bytes = encode(posts)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| PressError::io(parent, e))?;
    }

    let tmp = path.with_extension("tmp");
    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()
    };
    if let Err(e) = write().and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(PressError::io(path, e));
    }

    debug!(path = %path.display(), posts = posts.len(), "Snapshot saved");
    Ok(())
}

/// Read a snapshot file.
pub fn load_snapshot(path: &Path) -> Result<Vec<Post>> {
    let bytes = std::fs::read(path).map_err(|e| PressError::io(path, e))?;
    let posts = decode(&bytes)?;
    debug!(path = %path.display(), posts = posts.len(), "Snapshot loaded");
    Ok(posts)
}
