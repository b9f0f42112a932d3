//! Classification of MIME leaf parts.
//!
//! Every leaf is classified exactly once into a [`PartKind`]; the walker then
//! matches on it exhaustively.

use mail_parser::{MessagePart, MimeHeaders};

/// What a leaf part is, as far as publishing is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartKind {
    /// `image/*`, shown as an image asset.
    Image { mime: String },
    /// `text/plain` body.
    PlainText,
    /// `text/html` body.
    Html,
    /// Anything else, or a body explicitly marked as an attachment.
    Attachment { mime: String },
}

/// Lowercased `type/subtype` of a part. Defaults to `text/plain` (RFC 2045 §5.2).
pub fn mime_type_of(part: &MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_else(|| "text/plain".to_string())
}

/// `true` if the part carries `Content-Disposition: attachment`.
pub fn is_marked_attachment(part: &MessagePart<'_>) -> bool {
    part.content_disposition()
        .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// Classify a MIME type, taking an explicit attachment disposition into account.
pub fn classify(mime: &str, marked_attachment: bool) -> PartKind {
    let mime = mime.trim().to_ascii_lowercase();
    if mime.starts_with("image/") {
        return PartKind::Image { mime };
    }
    match mime.as_str() {
        "text/plain" if !marked_attachment => PartKind::PlainText,
        "text/html" if !marked_attachment => PartKind::Html,
        _ => PartKind::Attachment { mime },
    }
}

/// Classify a parsed leaf part.
pub fn classify_part(part: &MessagePart<'_>) -> PartKind {
    classify(&mime_type_of(part), is_marked_attachment(part))
}

/// `Content-ID` without angle brackets.
pub fn content_id_of(part: &MessagePart<'_>) -> Option<String> {
    part.content_id()
        .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|id| !id.is_empty())
}
