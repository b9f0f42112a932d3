//! Message parsing: MIME walk, per-part dispatch, post assembly.

use std::collections::{HashMap, HashSet};

use mail_parser::{HeaderName, Message, MessagePart, MimeHeaders};
use tracing::{debug, warn};

use crate::asset::AssetStore;
use crate::error::{PressError, Result};
use crate::model::post::push_block;
use crate::model::{Attachment, ContentBlock, Image, LinkPreview, Post, RawMessage};
use crate::parser::header::{decode_subject, parse_local_date, HeaderSet};
use crate::parser::part::{classify_part, content_id_of, mime_type_of, PartKind};
use crate::sanitize::{text_to_html, visible_len, HtmlSanitizer};

/// Maximum multipart nesting we follow (adversarial input guard).
const MAX_DEPTH: usize = 32;

/// A body part kept in its source form so it can be re-rendered once the
/// layout is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Decoded `text/plain` payload.
    Plain(String),
    /// `text/html` payload bytes.
    Html(Vec<u8>),
    /// An image part that no HTML body references. It is placed here, at
    /// its part position, when images are laid out in place.
    Image {
        public_uri: String,
        content_id: Option<String>,
    },
}

/// Output of [`MessageParser::parse`], before classification.
#[derive(Debug)]
pub struct ParsedMessage {
    /// The assembled post. `in_place_images` is still `false`.
    pub post: Post,
    /// Text / image blocks in encounter order.
    pub blocks: Vec<ContentBlock>,
    /// Body parts in document order.
    pub bodies: Vec<Body>,
    /// Parts that were skipped, with the reason.
    pub part_errors: Vec<PressError>,
}

/// Walks a raw message and assembles a [`Post`].
#[derive(Debug, Clone)]
pub struct MessageParser {
    assets: AssetStore,
    sanitizer: HtmlSanitizer,
}

/// One rendered body fragment.
struct Rendered {
    html: String,
    links: Vec<String>,
    is_long_post: bool,
    blocks: Vec<ContentBlock>,
    cid_refs: Vec<String>,
}

impl MessageParser {
    pub fn new(assets: AssetStore, sanitizer: HtmlSanitizer) -> Self {
        Self { assets, sanitizer }
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Parse one raw message.
    ///
    /// Fails only if the message as a whole is unusable (see
    /// [`validate_structure`]). Individual bad parts are skipped, logged,
    /// and listed in [`ParsedMessage::part_errors`].
    pub fn parse(&self, raw: &RawMessage) -> Result<ParsedMessage> {
        let uid = AssetStore::identify(&raw.bytes);
        let msg = mail_parser::MessageParser::default()
            .parse(&raw.bytes[..])
            .ok_or_else(|| PressError::MalformedMessage("no header fields found".into()))?;
        validate_structure(&msg, &raw.bytes)?;

        let source_headers = HeaderSet::from_pairs(&raw.headers);
        let raw_headers = HeaderSet::from_raw(&raw.bytes);
        let mut post = Post::new(uid);

        post.subject = match source_headers.get("subject").or_else(|| raw_headers.get("subject")) {
            Some(s) => Some(decode_subject(s)),
            None => msg.subject().map(str::to_string),
        };
        post.publish_date = source_headers
            .get("date")
            .or_else(|| raw_headers.get("date"))
            .or_else(|| msg.header_raw(HeaderName::Date))
            .and_then(parse_local_date);

        let mut leaves = Vec::new();
        collect_leaves(&msg, 0, 0, &mut leaves);

        let mut blocks = Vec::new();
        let mut bodies = Vec::new();
        let mut part_errors = Vec::new();
        let mut cid_refs: HashSet<String> = HashSet::new();
        let mut links: Vec<String> = Vec::new();
        let mut seen_links = HashSet::new();

        for id in leaves {
            let Some(part) = msg.part(id) else {
                continue;
            };
            if part.is_encoding_problem {
                let err = PressError::MalformedPart {
                    part: id,
                    reason: "payload could not be decoded".into(),
                };
                warn!(uid = %short(&post.uid), part = id, "Skipping malformed part");
                part_errors.push(err);
                continue;
            }

            match classify_part(part) {
                PartKind::Image { mime } => {
                    if part.contents().is_empty() {
                        warn!(uid = %short(&post.uid), part = id, "Skipping empty image part");
                        part_errors.push(PressError::MalformedPart {
                            part: id,
                            reason: "empty image payload".into(),
                        });
                        continue;
                    }
                    match Image::new(
                        &self.assets,
                        part.contents().to_vec(),
                        &mime,
                        content_id_of(part),
                    ) {
                        Ok(image) => {
                            push_block(&mut blocks, ContentBlock::Image);
                            bodies.push(Body::Image {
                                public_uri: image.public_uri.clone(),
                                content_id: image.content_id.clone(),
                            });
                            post.images.push(image);
                        }
                        Err(e) => {
                            warn!(
                                uid = %short(&post.uid),
                                part = id,
                                error = %e,
                                "Keeping unpublishable image as attachment"
                            );
                            post.attachments.push(attachment_from(part, mime));
                            part_errors.push(e);
                        }
                    }
                }
                PartKind::PlainText => {
                    let text = part
                        .text_contents()
                        .map(str::to_string)
                        .unwrap_or_else(|| String::from_utf8_lossy(part.contents()).into_owned());
                    let body = Body::Plain(text);
                    let rendered = self.render_body(&body, false, &HashMap::new());
                    self.absorb(&mut post, &mut blocks, &mut links, &mut seen_links, rendered);
                    bodies.push(body);
                }
                PartKind::Html => {
                    let body = Body::Html(part.contents().to_vec());
                    let rendered = self.render_body(&body, false, &HashMap::new());
                    cid_refs.extend(rendered.cid_refs.iter().cloned());
                    self.absorb(&mut post, &mut blocks, &mut links, &mut seen_links, rendered);
                    bodies.push(body);
                }
                PartKind::Attachment { mime } => {
                    debug!(uid = %short(&post.uid), part = id, mime = %mime, "Attachment");
                    post.attachments.push(attachment_from(part, mime));
                }
            }
        }

        // Images an HTML body places by Content-ID are not placed twice.
        bodies.retain(|body| match body {
            Body::Image {
                content_id: Some(cid),
                ..
            } => !cid_refs.contains(cid),
            _ => true,
        });

        post.url_previews = links.into_iter().map(LinkPreview::empty).collect();

        Ok(ParsedMessage {
            post,
            blocks,
            bodies,
            part_errors,
        })
    }

    /// Render all bodies again, e.g. with in-place images enabled.
    ///
    /// `cid_uris` maps Content-IDs to the public URIs of the post's images.
    pub fn render_html(
        &self,
        bodies: &[Body],
        in_place_images: bool,
        cid_uris: &HashMap<String, String>,
    ) -> String {
        let mut html = String::new();
        for body in bodies {
            let rendered = self.render_body(body, in_place_images, cid_uris);
            append_fragment(&mut html, &rendered.html);
        }
        html
    }

    fn render_body(
        &self,
        body: &Body,
        in_place_images: bool,
        cid_uris: &HashMap<String, String>,
    ) -> Rendered {
        match body {
            Body::Plain(text) => plain_rendered(&self.sanitizer, text),
            Body::Html(bytes) => match self.sanitizer.sanitize(bytes, in_place_images, cid_uris) {
                Ok(clean) => Rendered {
                    html: clean.html,
                    links: clean.links,
                    is_long_post: clean.is_long_post,
                    blocks: clean.blocks,
                    cid_refs: clean.cid_refs,
                },
                Err(e) => {
                    warn!(error = %e, "Falling back to plain text for HTML body");
                    plain_rendered(&self.sanitizer, &String::from_utf8_lossy(bytes))
                }
            },
            Body::Image { public_uri, .. } => Rendered {
                html: if in_place_images {
                    format!("<img src=\"{public_uri}\"/>")
                } else {
                    String::new()
                },
                links: Vec::new(),
                is_long_post: false,
                blocks: Vec::new(),
                cid_refs: Vec::new(),
            },
        }
    }

    fn absorb(
        &self,
        post: &mut Post,
        blocks: &mut Vec<ContentBlock>,
        links: &mut Vec<String>,
        seen_links: &mut HashSet<String>,
        rendered: Rendered,
    ) {
        append_fragment(&mut post.html, &rendered.html);
        post.is_long_post |= rendered.is_long_post;
        for block in rendered.blocks {
            push_block(blocks, block);
        }
        for link in rendered.links {
            if seen_links.insert(link.clone()) {
                links.push(link);
            }
        }
    }
}

fn plain_rendered(sanitizer: &HtmlSanitizer, text: &str) -> Rendered {
    let len = visible_len(text);
    Rendered {
        html: text_to_html(text),
        links: Vec::new(),
        is_long_post: sanitizer.is_long_form(len),
        blocks: if len > 0 {
            vec![ContentBlock::Text]
        } else {
            Vec::new()
        },
        cid_refs: Vec::new(),
    }
}

fn attachment_from(part: &MessagePart<'_>, content_type: String) -> Attachment {
    Attachment {
        content_type,
        filename: part.attachment_name().map(str::to_string),
        data: part.contents().to_vec(),
    }
}

/// Concatenate body fragments, one per line group.
fn append_fragment(html: &mut String, fragment: &str) {
    if fragment.is_empty() {
        return;
    }
    if !html.is_empty() && !html.ends_with('\n') {
        html.push('\n');
    }
    html.push_str(fragment);
}

/// Reject messages that cannot be published at all: no header fields, or a
/// multipart body whose closing delimiter never appears (truncated input).
pub fn validate_structure(msg: &Message<'_>, raw: &[u8]) -> Result<()> {
    if msg.root_part().headers().is_empty() {
        return Err(PressError::MalformedMessage("no header fields found".into()));
    }

    for part in &msg.parts {
        if !part.is_multipart() {
            continue;
        }
        let Some(boundary) = part.content_type().and_then(|ct| ct.attribute("boundary")) else {
            continue;
        };
        let closing = format!("--{boundary}--");
        if !contains(raw, closing.as_bytes()) {
            return Err(PressError::MalformedMessage(format!(
                "multipart body truncated: closing delimiter for boundary '{boundary}' missing"
            )));
        }
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Collect leaf part ids in document order.
///
/// From a `multipart/alternative` only the last alternative that holds a
/// body is followed.
fn collect_leaves(msg: &Message<'_>, id: usize, depth: usize, out: &mut Vec<usize>) {
    let Some(part) = msg.part(id) else {
        return;
    };
    let Some(children) = part.sub_parts() else {
        out.push(id);
        return;
    };
    if depth >= MAX_DEPTH {
        warn!(part = id, "Multipart nesting too deep, ignoring subtree");
        return;
    }

    if mime_type_of(part) == "multipart/alternative" {
        let chosen = children
            .iter()
            .rev()
            .find(|&&c| has_body(msg, c, depth + 1))
            .or(children.last());
        if let Some(&c) = chosen {
            debug!(part = id, chosen = c, of = children.len(), "Picked alternative");
            collect_leaves(msg, c, depth + 1, out);
        }
        return;
    }

    for &child in children {
        collect_leaves(msg, child, depth + 1, out);
    }
}

fn has_body(msg: &Message<'_>, id: usize, depth: usize) -> bool {
    let Some(part) = msg.part(id) else {
        return false;
    };
    match part.sub_parts() {
        Some(children) if depth < MAX_DEPTH => {
            children.iter().any(|&c| has_body(msg, c, depth + 1))
        }
        Some(_) => false,
        None => matches!(classify_part(part), PartKind::PlainText | PartKind::Html),
    }
}

/// First 12 hex digits of a uid, for log lines.
fn short(uid: &str) -> &str {
    uid.get(..12).unwrap_or(uid)
}
