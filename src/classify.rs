//! Post classification: image layout policy.
//!
//! A post's images are either shown in place (interleaved with the text,
//! where the message referenced them) or collected into a gallery. The
//! decision is a pure function of the text/image block sequence met while
//! parsing, so identical messages always get identical layouts.

use std::collections::HashMap;
use std::fmt::Debug;

use tracing::{debug, warn};

use crate::config::LayoutConfig;
use crate::model::{ContentBlock, Post};
use crate::parser::message::{MessageParser, ParsedMessage};

/// Decides between in-place and gallery layout.
pub trait LayoutPolicy: Debug + Send + Sync {
    /// `true` for in-place images, `false` for a gallery.
    fn in_place_images(&self, blocks: &[ContentBlock]) -> bool;
}

/// Always a gallery.
#[derive(Debug, Clone, Copy, Default)]
pub struct GalleryLayout;

impl LayoutPolicy for GalleryLayout {
    fn in_place_images(&self, _blocks: &[ContentBlock]) -> bool {
        false
    }
}

/// In place when some image sits between two runs of text ("text, picture,
/// more text"); a gallery when text only comes before or after the images.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterleavedLayout;

impl LayoutPolicy for InterleavedLayout {
    fn in_place_images(&self, blocks: &[ContentBlock]) -> bool {
        let Some(first_text) = blocks.iter().position(|b| *b == ContentBlock::Text) else {
            return false;
        };
        let Some(last_text) = blocks.iter().rposition(|b| *b == ContentBlock::Text) else {
            return false;
        };
        blocks[first_text..last_text]
            .iter()
            .any(|b| *b == ContentBlock::Image)
    }
}

/// Build the policy named in the `[layout]` config section.
pub fn policy_from_config(config: &LayoutConfig) -> Box<dyn LayoutPolicy> {
    match config.policy.trim().to_ascii_lowercase().as_str() {
        "gallery" => Box::new(GalleryLayout),
        "interleaved" => Box::new(InterleavedLayout),
        other => {
            warn!(policy = other, "Unknown layout policy, using interleaved");
            Box::new(InterleavedLayout)
        }
    }
}

/// Applies a [`LayoutPolicy`] to parsed messages.
#[derive(Debug)]
pub struct PostClassifier {
    policy: Box<dyn LayoutPolicy>,
}

impl Default for PostClassifier {
    fn default() -> Self {
        Self::new(Box::new(InterleavedLayout))
    }
}

impl PostClassifier {
    pub fn new(policy: Box<dyn LayoutPolicy>) -> Self {
        Self { policy }
    }

    /// Finalize a parsed message into a [`Post`].
    ///
    /// `is_long_post` is carried over from sanitizing. When the layout comes
    /// out in-place, the bodies are re-rendered so that every image appears
    /// where the message put it. If some image still has no place in the
    /// result, the post falls back to a gallery.
    pub fn classify(&self, parsed: ParsedMessage, parser: &MessageParser) -> Post {
        let ParsedMessage {
            mut post,
            blocks,
            bodies,
            ..
        } = parsed;

        post.in_place_images = self.policy.in_place_images(&blocks);
        debug!(uid = %post.uid, blocks = ?blocks, in_place = post.in_place_images, "Classified");

        if post.in_place_images {
            let cid_uris: HashMap<String, String> = post
                .images
                .iter()
                .filter_map(|img| {
                    img.content_id
                        .as_ref()
                        .map(|cid| (cid.clone(), img.public_uri.clone()))
                })
                .collect();
            let html = parser.render_html(&bodies, true, &cid_uris);
            let unplaced = post
                .images
                .iter()
                .filter(|img| !html.contains(&img.public_uri))
                .count();
            if unplaced == 0 {
                post.html = html;
            } else {
                debug!(uid = %post.uid, unplaced = unplaced, "Images without a place, using a gallery");
                post.in_place_images = false;
            }
        }
        post
    }
}
