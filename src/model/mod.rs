//! Data model for normalized posts and the assets they own.

pub mod attachment;
pub mod image;
pub mod post;
pub mod preview;

pub use attachment::Attachment;
pub use image::Image;
pub use post::{ContentBlock, Post, RawMessage};
pub use preview::LinkPreview;

/// Serde adapter storing binary payloads as base64 strings.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
