//! The normalized post and the raw input it is built from.

use chrono::{DateTime, Local};

use super::attachment::Attachment;
use super::image::Image;
use super::preview::LinkPreview;

/// Kind of a content block, in the order blocks are met while walking a
/// message. Input to the layout decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ContentBlock {
    /// A run of visible text.
    Text,
    /// An image, attached or referenced from HTML.
    Image,
}

/// Append `block` unless it repeats the previous one.
pub(crate) fn push_block(blocks: &mut Vec<ContentBlock>, block: ContentBlock) {
    if blocks.last() != Some(&block) {
        blocks.push(block);
    }
}

/// One raw message as supplied by a mail source.
///
/// `headers` carries header fields the source already knows about (an IMAP
/// envelope, for instance). They take precedence over the headers inside
/// `bytes`; an empty list means "read everything from the message itself".
#[derive(Debug, Clone, Default)]
pub struct RawMessage {
    /// The complete RFC 5322 message.
    pub bytes: Vec<u8>,
    /// `(lowercase_name, value)` pairs supplied by the source.
    pub headers: Vec<(String, String)>,
}

impl RawMessage {
    /// Wrap raw bytes with no source-supplied headers.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            headers: Vec::new(),
        }
    }
}

/// One normalized unit of publishable content.
///
/// Built by [`MessageParser`](crate::parser::message::MessageParser), given
/// its previews by the pipeline and its layout by
/// [`PostClassifier`](crate::classify::PostClassifier). Read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Post {
    /// Hex SHA-256 of the full raw message. Stable across re-ingestion.
    pub uid: String,

    /// Decoded `Subject:` header (RFC 2047 encoded-words resolved).
    pub subject: Option<String>,

    /// `Date:` header in local time. `None` if missing or unparseable.
    pub publish_date: Option<DateTime<Local>>,

    /// Sanitized HTML fragment.
    pub html: String,

    /// Images in the order they appear in the message.
    pub images: Vec<Image>,

    /// Parts that cannot be rendered inline.
    pub attachments: Vec<Attachment>,

    /// One preview per distinct outbound link, in first-seen order.
    pub url_previews: Vec<LinkPreview>,

    /// Visible text exceeded the long-form threshold.
    pub is_long_post: bool,

    /// Images render where they are referenced instead of as a gallery.
    pub in_place_images: bool,
}

impl Post {
    /// An empty post with the given identity.
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            ..Self::default()
        }
    }

    /// URLs awaiting (or holding) previews, in order.
    pub fn link_urls(&self) -> impl Iterator<Item = &str> {
        self.url_previews.iter().map(|p| p.source_url.as_str())
    }
}
