//! Link previews: fetch a page and pull title, thumbnail and description.
//!
//! Fetching never fails from the caller's point of view. Network errors,
//! timeouts and error statuses all produce a [`LinkPreview`] holding only its
//! URL, with a log line explaining why.

use std::time::Duration;

use ego_tree::NodeRef;
use futures::stream::{self, StreamExt};
use reqwest::Url;
use scraper::{Html, Node};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PreviewConfig;
use crate::error::{PressError, Result};
use crate::model::LinkPreview;
use crate::sanitize::elements;

/// Structured (sharing) metadata keys, most preferred first.
const TITLE_KEYS: &[&str] = &["og:title", "twitter:title"];
const IMAGE_KEYS: &[&str] = &["og:image", "og:image:url", "og:image:secure_url", "twitter:image"];
const DESCRIPTION_KEYS: &[&str] = &["og:description", "twitter:description"];

/// Suffix for truncated fallback titles.
const ELLIPSIS: &str = "...";

/// Fetches link previews over HTTP with bounded concurrency.
#[derive(Debug, Clone)]
pub struct LinkPreviewFetcher {
    client: reqwest::Client,
    enabled: bool,
    timeout: Duration,
    max_concurrency: usize,
    fallback_title_max: usize,
}

impl LinkPreviewFetcher {
    /// Create a fetcher from the `[preview]` config section.
    pub fn new(config: &PreviewConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Could not configure HTTP client, using defaults");
                reqwest::Client::new()
            });

        Self {
            client,
            enabled: config.enabled,
            timeout,
            max_concurrency: config.max_concurrency.max(1),
            fallback_title_max: config.fallback_title_max,
        }
    }

    /// Fetch the preview for one URL. Never fails.
    pub async fn fetch(&self, url: &str) -> LinkPreview {
        if !self.enabled {
            return LinkPreview::empty(url);
        }

        let result = match tokio::time::timeout(self.timeout, self.try_fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(PressError::PreviewFetch {
                url: url.to_string(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            }),
        };

        match result {
            Ok(Some(page)) => extract_preview(url, &page, self.fallback_title_max),
            Ok(None) => LinkPreview::empty(url),
            Err(e) => {
                warn!(error = %e, "Link preview unavailable");
                LinkPreview::empty(url)
            }
        }
    }

    /// Fetch previews for many URLs, keeping their order.
    ///
    /// At most `max_concurrency` requests are in flight. Once `cancel` fires,
    /// outstanding and not-yet-started fetches resolve to empty previews.
    pub async fn fetch_all(&self, urls: Vec<String>, cancel: &CancellationToken) -> Vec<LinkPreview> {
        stream::iter(urls.into_iter().map(|url| async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(url = %url, "Preview fetch abandoned");
                    LinkPreview::empty(url.as_str())
                }
                preview = self.fetch(&url) => preview,
            }
        }))
        .buffered(self.max_concurrency)
        .collect()
        .await
    }

    /// GET the page. `Ok(None)` for a non-success status.
    async fn try_fetch(&self, url: &str) -> Result<Option<String>> {
        let fetch_err = |reason: String| PressError::PreviewFetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            info!(url = url, status = %status, "Link preview page returned an error status");
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| fetch_err(e.to_string()))?;
        Ok(Some(body))
    }
}

/// Build a preview from a fetched page.
///
/// Each field comes from structured sharing metadata when present; only an
/// absent field is filled in from page content. Titles found that way (or
/// the URL itself, as a last resort) are cut to `fallback_title_max`
/// characters plus `"..."`.
pub fn extract_preview(url: &str, page: &str, fallback_title_max: usize) -> LinkPreview {
    let doc = Html::parse_document(page);
    let root = doc.tree.root();

    let title = meta_content(root, TITLE_KEYS).or_else(|| {
        let fallback = first_text(root, "title")
            .or_else(|| first_text(root, "h1"))
            .unwrap_or_else(|| url.to_string());
        Some(truncate_title(&fallback, fallback_title_max))
    });

    let thumbnail_url = meta_content(root, IMAGE_KEYS)
        .or_else(|| {
            elements(root)
                .filter(|e| e.value().name() == "img")
                .filter_map(|e| e.value().attr("src"))
                .map(str::trim)
                .find(|src| !src.is_empty() && !src.starts_with("data:"))
                .map(str::to_string)
        })
        .map(|src| resolve_url(url, &src));

    let description = meta_content(root, DESCRIPTION_KEYS)
        .or_else(|| meta_content(root, &["description"]))
        .or_else(|| first_text(root, "p"));

    LinkPreview {
        source_url: url.to_string(),
        title,
        thumbnail_url,
        description,
    }
}

/// `content` of the first `<meta>` whose `property` or `name` matches a key,
/// trying keys in order.
fn meta_content(root: NodeRef<'_, Node>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        elements(root)
            .filter(|e| e.value().name() == "meta")
            .find(|e| {
                let el = e.value();
                el.attr("property")
                    .or_else(|| el.attr("name"))
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(key))
            })
            .and_then(|e| e.value().attr("content"))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    })
}

/// Whitespace-collapsed text of the first non-empty `tag` element.
fn first_text(root: NodeRef<'_, Node>, tag: &str) -> Option<String> {
    elements(root)
        .filter(|e| e.value().name() == tag)
        .map(|e| e.text().collect::<Vec<_>>().join(" "))
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

/// Cut a title to `max` characters, marking the cut with `"..."`.
pub fn truncate_title(title: &str, max: usize) -> String {
    if title.chars().count() <= max {
        return title.to_string();
    }
    let mut cut: String = title.chars().take(max).collect();
    cut.push_str(ELLIPSIS);
    cut
}

fn resolve_url(base: &str, reference: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(reference))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP responder: each route is `(path, status, body)`.
    async fn serve(routes: Vec<(&'static str, u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let n = sock.read(&mut buf).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&buf[..n]).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| *p == path)
                        .map(|(_, s, b)| (*s, b.clone()))
                        .unwrap_or((404, "missing".to_string()));
                    if path == "/slow" {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = sock.write_all(response.as_bytes()).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn fetcher(timeout_secs: u64) -> LinkPreviewFetcher {
        LinkPreviewFetcher::new(&PreviewConfig {
            timeout_secs,
            ..PreviewConfig::default()
        })
    }

    #[test]
    fn test_structured_title_preferred() {
        let page = r#"<html><head>
            <title>Page title that is quite long indeed</title>
            <meta property="og:title" content="Sharing title that is also rather long">
            </head><body><h1>Heading</h1></body></html>"#;
        let preview = extract_preview("https://example.com/a", page, 30);
        assert_eq!(
            preview.title.as_deref(),
            Some("Sharing title that is also rather long")
        );
    }

    #[test]
    fn test_fallback_title_truncated() {
        let page = "<html><head><title>An extremely long page title that goes on</title></head></html>";
        let preview = extract_preview("https://example.com/a", page, 30);
        assert_eq!(
            preview.title.as_deref(),
            Some("An extremely long page title t...")
        );
    }

    #[test]
    fn test_url_is_last_resort_title() {
        let preview = extract_preview("https://example.com/some/really/long/path", "<p></p>", 30);
        assert_eq!(
            preview.title.as_deref(),
            Some("https://example.com/some/reall...")
        );
    }

    #[test]
    fn test_fields_fall_back_independently() {
        let page = r#"<html><head>
            <meta name="twitter:image" content="/img/card.png">
            </head><body><h1>Title</h1><p>  First   paragraph. </p><p>Second</p></body></html>"#;
        let preview = extract_preview("https://example.com/post/1", page, 30);
        assert_eq!(preview.title.as_deref(), Some("Title"));
        assert_eq!(
            preview.thumbnail_url.as_deref(),
            Some("https://example.com/img/card.png")
        );
        assert_eq!(preview.description.as_deref(), Some("First paragraph."));
    }

    #[test]
    fn test_structured_description_wins() {
        let page = r#"<meta property="og:description" content="From OG">
            <meta name="description" content="From meta"><p>From body</p>"#;
        let preview = extract_preview("https://example.com/", page, 30);
        assert_eq!(preview.description.as_deref(), Some("From OG"));
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("short", 30), "short");
        assert_eq!(truncate_title("abcdef", 3), "abc...");
        assert_eq!(truncate_title("ñandúes", 2), "ña...");
    }

    #[tokio::test]
    async fn test_error_status_gives_empty_preview() {
        let base = serve(vec![("/gone", 410, "<title>Gone</title>".into())]).await;
        let url = format!("{base}/gone");
        let preview = fetcher(5).fetch(&url).await;
        assert_eq!(preview, LinkPreview::empty(url));
    }

    #[tokio::test]
    async fn test_unreachable_host_gives_empty_preview() {
        // Bind then drop, so nothing listens on the port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = format!("http://{addr}/");
        let preview = fetcher(2).fetch(&url).await;
        assert!(preview.is_empty());
        assert_eq!(preview.source_url, url);
    }

    #[tokio::test]
    async fn test_successful_fetch() {
        let page = r#"<meta property="og:title" content="Hello"><meta property="og:image" content="https://cdn.example/x.jpg">"#;
        let base = serve(vec![("/ok", 200, page.to_string())]).await;
        let preview = fetcher(5).fetch(&format!("{base}/ok")).await;
        assert_eq!(preview.title.as_deref(), Some("Hello"));
        assert_eq!(
            preview.thumbnail_url.as_deref(),
            Some("https://cdn.example/x.jpg")
        );
    }

    #[tokio::test]
    async fn test_slow_fetch_does_not_block_siblings() {
        let base = serve(vec![
            ("/slow", 200, "<title>slow</title>".into()),
            ("/fast", 200, r#"<meta property="og:title" content="Fast">"#.into()),
        ])
        .await;
        let urls = vec![format!("{base}/slow"), format!("{base}/fast")];
        let started = std::time::Instant::now();
        let previews = fetcher(1).fetch_all(urls.clone(), &CancellationToken::new()).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(previews.len(), 2);
        assert_eq!(previews[0], LinkPreview::empty(urls[0].clone()));
        assert_eq!(previews[1].title.as_deref(), Some("Fast"));
    }

    #[tokio::test]
    async fn test_cancelled_fetches_are_empty() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let urls = vec!["http://127.0.0.1:9/a".to_string()];
        let previews = fetcher(5).fetch_all(urls, &cancel).await;
        assert_eq!(previews, vec![LinkPreview::empty("http://127.0.0.1:9/a")]);
    }

    #[tokio::test]
    async fn test_disabled_fetcher_skips_network() {
        let f = LinkPreviewFetcher::new(&PreviewConfig {
            enabled: false,
            ..PreviewConfig::default()
        });
        let preview = f.fetch("http://127.0.0.1:9/").await;
        assert!(preview.is_empty());
    }
}
