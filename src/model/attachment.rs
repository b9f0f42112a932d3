//! Non-renderable message parts carried along with a post.

/// A MIME leaf part that is neither a body nor a publishable image.
///
/// Rendering offers these as downloads.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Attachment {
    /// Declared MIME type, lowercased (e.g. `"application/pdf"`).
    pub content_type: String,

    /// Filename from `Content-Disposition` / `Content-Type` `name`, if any.
    pub filename: Option<String>,

    /// Decoded payload.
    #[serde(with = "super::base64_bytes")]
    pub data: Vec<u8>,
}

impl Default for Attachment {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_string(),
            filename: None,
            data: Vec::new(),
        }
    }
}
