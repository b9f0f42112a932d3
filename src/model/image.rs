//! Image assets extracted from messages.

use std::path::PathBuf;

use crate::asset::AssetStore;
use crate::error::Result;

/// An image owned by one post.
///
/// The bytes are content-addressed: identical images in different posts share
/// the same `id`, and therefore the same file on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Image {
    /// Hex SHA-256 of `data`.
    pub id: String,

    /// Declared MIME type (e.g. `"image/jpeg"`).
    pub mime: String,

    /// File extension derived from `mime`, without the dot.
    pub extension: String,

    /// `Content-ID` of the part (angle brackets stripped), used to match
    /// `cid:` references in HTML bodies.
    pub content_id: Option<String>,

    /// Where the asset is written: `<publish_dir>/<static_prefix>/<id>.<ext>`.
    pub storage_path: PathBuf,

    /// Where the asset is served: `<base_uri><static_prefix>/<id>.<ext>`.
    pub public_uri: String,

    /// Decoded image bytes.
    #[serde(with = "super::base64_bytes")]
    pub data: Vec<u8>,
}

impl Image {
    /// Build an image asset from a decoded payload.
    ///
    /// Fails with [`PressError::UnknownMimeType`](crate::error::PressError::UnknownMimeType)
    /// if the store has no extension for `mime`.
    pub fn new(
        store: &AssetStore,
        data: Vec<u8>,
        mime: &str,
        content_id: Option<String>,
    ) -> Result<Self> {
        let mime = mime.trim().to_ascii_lowercase();
        let extension = AssetStore::extension_for_mime(&mime)?.to_string();
        let id = AssetStore::identify(&data);
        Ok(Self {
            storage_path: store.resolve_path(&id, &extension),
            public_uri: store.resolve_uri(&id, &extension),
            id,
            mime,
            extension,
            content_id,
            data,
        })
    }
}
