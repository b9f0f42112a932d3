//! Link preview metadata.

/// Preview metadata for one outbound link.
///
/// Every field except `source_url` is optional: a preview with nothing but
/// its URL is a normal outcome (the page was unreachable or had no metadata).
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LinkPreview {
    /// The link target as found in the post body.
    pub source_url: String,
    pub title: Option<String>,
    pub thumbnail_url: Option<String>,
    pub description: Option<String>,
}

impl LinkPreview {
    /// A preview that only knows its URL.
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            source_url: url.into(),
            ..Self::default()
        }
    }

    /// `true` if no metadata field is set.
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.thumbnail_url.is_none() && self.description.is_none()
    }
}
