//! HTML body sanitizing: cleanup, link discovery, long-form classification.
//!
//! The body is parsed into a DOM with `scraper` (html5ever underneath). Nothing
//! is edited in place: removals are collected as a set of node ids and the
//! serializer skips them when writing the canonical, pretty-printed fragment.

use std::collections::{HashMap, HashSet};

use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node};

use crate::config::SanitizeConfig;
use crate::error::{PressError, Result};
use crate::model::post::push_block;
use crate::model::ContentBlock;

/// Marker inserted for line breaks when converting plain text.
pub const LINE_BREAK: &str = "<br/>";

/// Elements that never have content or a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements dropped together with everything inside them.
const DROPPED_ELEMENTS: &[&str] = &["script", "style", "iframe", "object", "noscript"];

/// Elements whose whitespace is significant.
const PREFORMATTED: &[&str] = &["pre", "textarea"];

/// Output of [`HtmlSanitizer::sanitize`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedHtml {
    /// Canonical, pretty-printed fragment (the children of `<body>`).
    pub html: String,
    /// Distinct `http(s)` anchor targets in first-seen order.
    pub links: Vec<String>,
    /// Visible text exceeded the long-form threshold.
    pub is_long_post: bool,
    /// Number of visible characters (whitespace runs count as one).
    pub text_len: usize,
    /// Text / image blocks in document order.
    pub blocks: Vec<ContentBlock>,
    /// Content-IDs referenced by `<img src="cid:…">`, in document order.
    pub cid_refs: Vec<String>,
}

/// Cleans HTML bodies.
#[derive(Debug, Clone)]
pub struct HtmlSanitizer {
    long_post_threshold: usize,
    prune_tags: Vec<String>,
}

impl Default for HtmlSanitizer {
    fn default() -> Self {
        Self::from_config(&SanitizeConfig::default())
    }
}

impl HtmlSanitizer {
    /// Create a sanitizer with an explicit threshold and prunable tag set.
    pub fn new(long_post_threshold: usize, prune_tags: Vec<String>) -> Self {
        Self {
            long_post_threshold,
            prune_tags: prune_tags
                .into_iter()
                .map(|t| t.to_ascii_lowercase())
                .collect(),
        }
    }

    /// Create a sanitizer from the `[sanitize]` config section.
    pub fn from_config(config: &SanitizeConfig) -> Self {
        Self::new(config.long_post_threshold, config.prune_tags.clone())
    }

    /// `true` if `text_len` visible characters make a long-form post.
    pub fn is_long_form(&self, text_len: usize) -> bool {
        text_len > self.long_post_threshold
    }

    /// Sanitize one HTML body.
    ///
    /// With `in_place_images` off, `<img src="cid:…">` elements are removed:
    /// those images are published separately as gallery assets. With it on,
    /// they are kept and their `src` is rewritten through `cid_uris`
    /// (Content-ID → public URI); references with no entry are still removed.
    ///
    /// Fails with [`PressError::UnsanitizableHtml`] if the body is not UTF-8.
    pub fn sanitize(
        &self,
        raw: &[u8],
        in_place_images: bool,
        cid_uris: &HashMap<String, String>,
    ) -> Result<SanitizedHtml> {
        let source = std::str::from_utf8(raw)
            .map_err(|e| PressError::UnsanitizableHtml(format!("body is not UTF-8: {e}")))?;

        let doc = Html::parse_document(source);
        let body = find_body(&doc);

        let mut removed: HashSet<NodeId> = HashSet::new();
        let mut text = String::new();
        let mut blocks = Vec::new();
        let mut cid_refs = Vec::new();
        let mut links = Vec::new();
        let mut seen_links = HashSet::new();

        scan(
            body,
            &mut Scan {
                removed: &mut removed,
                text: &mut text,
                blocks: &mut blocks,
                cid_refs: &mut cid_refs,
                links: &mut links,
                seen_links: &mut seen_links,
                in_place_images,
                cid_uris,
            },
        );

        let text_len = visible_len(&text);

        for child in body.children() {
            self.prune(child, &mut removed);
        }

        let mut html = String::with_capacity(source.len());
        let ctx = Serialize {
            removed: &removed,
            cid_uris: if in_place_images { Some(cid_uris) } else { None },
        };
        for child in body.children() {
            write_pretty(&mut html, child, 0, &ctx);
        }

        Ok(SanitizedHtml {
            html,
            links,
            is_long_post: self.is_long_form(text_len),
            text_len,
            blocks,
            cid_refs,
        })
    }

    /// Post-order pruning of degenerate containers. Returns `true` if `node`
    /// is (now) removed.
    fn prune(&self, node: NodeRef<'_, Node>, removed: &mut HashSet<NodeId>) -> bool {
        if removed.contains(&node.id()) {
            return true;
        }
        let Some(element) = node.value().as_element() else {
            return false;
        };

        for child in node.children() {
            self.prune(child, removed);
        }

        if !self.prune_tags.iter().any(|t| t == element.name()) {
            return false;
        }

        let mut element_children = Vec::new();
        for child in node.children() {
            if removed.contains(&child.id()) {
                continue;
            }
            match child.value() {
                Node::Element(e) => element_children.push(e.name()),
                Node::Text(t) if !t.trim().is_empty() => return false,
                _ => {}
            }
        }

        let degenerate = match element_children.as_slice() {
            [] => true,
            ["br"] => true,
            _ => false,
        };
        if degenerate {
            removed.insert(node.id());
        }
        degenerate
    }
}

/// Convert a plain-text body to HTML: line breaks become [`LINE_BREAK`].
///
/// Nothing else is touched; in particular the text is not escaped.
pub fn text_to_html(text: &str) -> String {
    text.replace("\r\n", LINE_BREAK).replace('\n', LINE_BREAK)
}

/// Count visible characters the way [`HtmlSanitizer`] does.
pub fn visible_len(text: &str) -> usize {
    let mut len = 0;
    for (i, word) in text.split_whitespace().enumerate() {
        if i > 0 {
            len += 1;
        }
        len += word.chars().count();
    }
    len
}

/// Strip `cid:` and surrounding angle brackets from an image reference.
pub fn content_id_of(src: &str) -> Option<&str> {
    let rest = src.trim();
    let rest = rest
        .get(..4)
        .filter(|scheme| scheme.eq_ignore_ascii_case("cid:"))
        .map(|_| &rest[4..])?;
    Some(rest.trim_start_matches('<').trim_end_matches('>'))
}

/// `true` for absolute `http:` / `https:` URLs.
pub fn is_web_url(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Iterate over every element below (and including) `root`.
pub(crate) fn elements<'a>(root: NodeRef<'a, Node>) -> impl Iterator<Item = ElementRef<'a>> {
    root.descendants().filter_map(ElementRef::wrap)
}

fn find_body(doc: &Html) -> NodeRef<'_, Node> {
    elements(doc.tree.root())
        .find(|e| e.value().name() == "body")
        .map(|e| *e)
        .unwrap_or_else(|| doc.tree.root())
}

struct Scan<'s> {
    removed: &'s mut HashSet<NodeId>,
    /// Visible text of the body, concatenated in document order.
    text: &'s mut String,
    blocks: &'s mut Vec<ContentBlock>,
    cid_refs: &'s mut Vec<String>,
    links: &'s mut Vec<String>,
    seen_links: &'s mut HashSet<String>,
    in_place_images: bool,
    cid_uris: &'s HashMap<String, String>,
}

/// Single document-order pass: drops unsafe subtrees, measures text, records
/// blocks, removes `cid:` images and collects links.
fn scan(node: NodeRef<'_, Node>, st: &mut Scan<'_>) {
    for child in node.children() {
        match child.value() {
            Node::Text(t) => {
                st.text.push_str(t);
                if !t.trim().is_empty() {
                    push_block(st.blocks, ContentBlock::Text);
                }
            }
            Node::Element(e) => {
                let name = e.name();
                if DROPPED_ELEMENTS.contains(&name) {
                    st.removed.insert(child.id());
                    continue;
                }
                if name == "img" {
                    push_block(st.blocks, ContentBlock::Image);
                    if let Some(cid) = e.attr("src").and_then(content_id_of) {
                        st.cid_refs.push(cid.to_string());
                        if !st.in_place_images || !st.cid_uris.contains_key(cid) {
                            st.removed.insert(child.id());
                        }
                    }
                    continue;
                }
                if name == "a" {
                    if let Some(href) = e.attr("href").map(str::trim) {
                        if is_web_url(href) && st.seen_links.insert(href.to_string()) {
                            st.links.push(href.to_string());
                        }
                    }
                }
                scan(child, st);
            }
            _ => {}
        }
    }
}

struct Serialize<'a> {
    removed: &'a HashSet<NodeId>,
    /// Present only when `cid:` sources are rewritten.
    cid_uris: Option<&'a HashMap<String, String>>,
}

fn write_pretty(out: &mut String, node: NodeRef<'_, Node>, depth: usize, ctx: &Serialize<'_>) {
    if ctx.removed.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(t) => {
            let trimmed = t.trim();
            if !trimmed.is_empty() {
                indent(out, depth);
                escape_text(out, trimmed);
                out.push('\n');
            }
        }
        Node::Element(e) => {
            let name = e.name();
            indent(out, depth);
            write_start_tag(out, e, ctx);
            if VOID_ELEMENTS.contains(&name) {
                out.push('\n');
                return;
            }
            if PREFORMATTED.contains(&name) {
                for child in node.children() {
                    write_compact(out, child, ctx);
                }
                out.push_str("</");
                out.push_str(name);
                out.push_str(">\n");
                return;
            }
            out.push('\n');
            for child in node.children() {
                write_pretty(out, child, depth + 1, ctx);
            }
            indent(out, depth);
            out.push_str("</");
            out.push_str(name);
            out.push_str(">\n");
        }
        _ => {}
    }
}

/// Whitespace-preserving serialization for preformatted content.
fn write_compact(out: &mut String, node: NodeRef<'_, Node>, ctx: &Serialize<'_>) {
    if ctx.removed.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(t) => escape_text(out, t),
        Node::Element(e) => {
            write_start_tag(out, e, ctx);
            if VOID_ELEMENTS.contains(&e.name()) {
                return;
            }
            for child in node.children() {
                write_compact(out, child, ctx);
            }
            out.push_str("</");
            out.push_str(e.name());
            out.push('>');
        }
        _ => {}
    }
}

fn write_start_tag(out: &mut String, e: &scraper::node::Element, ctx: &Serialize<'_>) {
    let name = e.name();
    out.push('<');
    out.push_str(name);
    for (attr, value) in e.attrs() {
        if attr.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("on")) {
            continue;
        }
        if matches!(attr, "href" | "src")
            && value.trim_start().to_ascii_lowercase().starts_with("javascript:")
        {
            continue;
        }
        let value = match (name, attr, ctx.cid_uris) {
            ("img", "src", Some(map)) => content_id_of(value)
                .and_then(|cid| map.get(cid))
                .map_or(value, String::as_str),
            _ => value,
        };
        out.push(' ');
        out.push_str(attr);
        out.push_str("=\"");
        escape_attr(out, value);
        out.push('"');
    }
    if VOID_ELEMENTS.contains(&name) {
        out.push('/');
    }
    out.push('>');
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push(' ');
    }
}

fn escape_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}
