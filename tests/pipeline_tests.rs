//! Integration tests for the ingestion pipeline, mail sources and snapshots.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mailpress::asset::{AssetStore, PersistOutcome};
use mailpress::config::Config;
use mailpress::error::PressError;
use mailpress::model::{LinkPreview, RawMessage};
use mailpress::pipeline::Pipeline;
use mailpress::snapshot;
use mailpress::source::{EmlDirSource, MboxSource, MessageSource};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn offline_config(publish_dir: &Path) -> Config {
    let mut config = Config::default();
    config.publish.publish_dir = publish_dir.to_path_buf();
    config.preview.enabled = false;
    config
}

fn mailbox() -> Vec<RawMessage> {
    MboxSource::new(fixture("posts.mbox")).messages().unwrap()
}

// ─── Test 1: Truncated message 3 → N-1 posts, failure at index 2 ────

#[tokio::test]
async fn test_truncated_message_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let messages = mailbox();
    assert_eq!(messages.len(), 5);

    let outcome = Pipeline::new(&offline_config(dir.path()))
        .run(messages, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.posts.len(), 4);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].index, 2);
    match &outcome.failures[0].error {
        PressError::BatchItem { index, source } => {
            assert_eq!(*index, 2);
            assert!(matches!(**source, PressError::MalformedMessage(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    let subjects: Vec<_> = outcome
        .posts
        .iter()
        .map(|p| p.subject.clone().unwrap_or_default())
        .collect();
    assert_eq!(
        subjects,
        [
            "First post",
            "Second post ☀",
            "Picture",
            "Same picture, more words"
        ]
    );
}

// ─── Test 2: Bodies, links and classification ───────────────────────

#[tokio::test]
async fn test_post_contents() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = Pipeline::new(&offline_config(dir.path()))
        .run(mailbox(), &CancellationToken::new())
        .await
        .unwrap();
    let posts = &outcome.posts;

    assert!(posts[0].html.starts_with("Hello from the first post."));
    assert!(!posts[0].html.contains('\n'));
    assert!(!posts[0].is_long_post);
    assert_eq!(
        posts[0].publish_date.map(|d| d.timestamp()),
        Some(1_704_362_400)
    );

    assert!(!posts[1].html.contains("<div"));
    assert!(posts[1].html.contains("this"));
    assert_eq!(
        posts[1].url_previews,
        vec![LinkPreview::empty("https://example.com/a")]
    );

    assert_eq!(posts[2].images.len(), 1);
    assert!(!posts[2].in_place_images);
    assert!(posts[3].is_long_post);
}

// ─── Test 3: Re-running the batch is idempotent ─────────────────────

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(&offline_config(dir.path()));
    let first = pipeline
        .run(mailbox(), &CancellationToken::new())
        .await
        .unwrap();
    let second = pipeline
        .run(mailbox(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.posts, second.posts);
    for (a, b) in first.posts.iter().zip(&second.posts) {
        assert_eq!(a.uid, b.uid);
        assert_eq!(a.html, b.html);
        let ids_a: Vec<_> = a.images.iter().map(|i| &i.id).collect();
        let ids_b: Vec<_> = b.images.iter().map(|i| &i.id).collect();
        assert_eq!(ids_a, ids_b);
    }
}

// ─── Test 4: Identical images across posts share one file ───────────

#[tokio::test]
async fn test_shared_image_written_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = offline_config(dir.path());
    let pipeline = Pipeline::new(&config);
    let outcome = pipeline
        .run(mailbox(), &CancellationToken::new())
        .await
        .unwrap();

    let a = &outcome.posts[2].images[0];
    let b = &outcome.posts[3].images[0];
    assert_eq!(a.id, b.id);
    assert_eq!(a.storage_path, b.storage_path);
    assert_eq!(a.public_uri, format!("/static/{}.png", a.id));

    let files: Vec<_> = std::fs::read_dir(dir.path().join("static"))
        .unwrap()
        .collect();
    assert_eq!(files.len(), 1);
    assert!(a.storage_path.is_file());

    let store = AssetStore::from_config(&config.publish);
    assert_eq!(
        store.persist_image(a, false).unwrap(),
        PersistOutcome::Skipped
    );
}

// ─── Test 5: Asset write failures do not drop the post ──────────────

#[tokio::test]
async fn test_asset_write_failure_keeps_post() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let outcome = Pipeline::new(&offline_config(&blocker))
        .run(mailbox(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.posts.len(), 4);
    assert_eq!(outcome.asset_failures.len(), 2);
    assert!(matches!(
        outcome.asset_failures[0].error,
        PressError::AssetWrite { .. }
    ));
    assert_eq!(outcome.asset_failures[0].post_uid, outcome.posts[2].uid);
}

// ─── Test 6: Nested multipart from a .eml directory ─────────────────

#[tokio::test]
async fn test_newsletter_layout_and_attachments() {
    let dir = tempfile::tempdir().unwrap();
    let messages = EmlDirSource::new(fixture("eml")).messages().unwrap();
    let outcome = Pipeline::new(&offline_config(dir.path()))
        .run(messages, &CancellationToken::new())
        .await
        .unwrap();
    assert!(outcome.is_clean());

    let post = &outcome.posts[0];
    assert_eq!(post.subject.as_deref(), Some("Weekly"));
    assert_eq!(
        post.publish_date.map(|d| d.timestamp()),
        Some(1_704_702_600)
    );

    // The HTML alternative wins; the plain one is never rendered.
    assert!(!post.html.contains("Plain version"));
    assert!(post.html.contains("Intro paragraph"));
    assert!(!post.html.contains("alert"));

    // Text, image, text: the image stays where the message put it.
    assert!(post.in_place_images);
    let image = &post.images[0];
    assert_eq!(image.content_id.as_deref(), Some("chart@news"));
    assert!(post
        .html
        .contains(&format!("<img src=\"{}\"/>", image.public_uri)));

    assert_eq!(post.attachments.len(), 1);
    assert_eq!(post.attachments[0].content_type, "application/pdf");
    assert_eq!(post.attachments[0].filename.as_deref(), Some("report.pdf"));
    assert_eq!(post.attachments[0].data, b"%PDF-1.4");

    assert_eq!(
        post.url_previews,
        vec![LinkPreview::empty("https://news.example.org/full")]
    );
}

// ─── Test 7: Snapshot round-trip of a processed batch ───────────────

#[tokio::test]
async fn test_snapshot_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = Pipeline::new(&offline_config(&dir.path().join("site")))
        .run(mailbox(), &CancellationToken::new())
        .await
        .unwrap();

    let path = dir.path().join("posts.json");
    snapshot::save_snapshot(&path, &outcome.posts).unwrap();
    assert_eq!(snapshot::load_snapshot(&path).unwrap(), outcome.posts);
}

// ─── Test 8: Previews over HTTP, failures absorbed ──────────────────

/// Serve `/card` with sharing metadata and 404 for everything else.
async fn preview_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = sock.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let (status, body) = if request.starts_with("GET /card ") {
                    (
                        "200 OK",
                        r#"<html><head><title>Plain title</title>
                        <meta property="og:title" content="Card title">
                        <meta property="og:image" content="/thumb.png"></head>
                        <body><p>First paragraph</p></body></html>"#,
                    )
                } else {
                    ("404 Not Found", "nothing here")
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_previews_fetched_and_shared() {
    let base = preview_server().await;
    let html = |n: usize| {
        RawMessage::new(format!(
            "From: a@example.com\r\nSubject: Links {n}\r\nContent-Type: text/html\r\n\r\n\
             <p><a href=\"{base}/card\">card</a> <a href=\"{base}/missing\">gone</a></p>\r\n"
        ))
    };

    let dir = tempfile::tempdir().unwrap();
    let mut config = offline_config(dir.path());
    config.preview.enabled = true;
    config.preview.timeout_secs = 5;

    let outcome = Pipeline::new(&config)
        .run(vec![html(1), html(2)], &CancellationToken::new())
        .await
        .unwrap();

    for post in &outcome.posts {
        let card = &post.url_previews[0];
        assert_eq!(card.title.as_deref(), Some("Card title"));
        assert_eq!(
            card.thumbnail_url.as_deref(),
            Some(format!("{base}/thumb.png").as_str())
        );
        assert_eq!(card.description.as_deref(), Some("First paragraph"));

        assert_eq!(
            post.url_previews[1],
            LinkPreview::empty(format!("{base}/missing"))
        );
    }
}

// ─── Test 9: No messages at all is an explicit failure ──────────────

#[tokio::test]
async fn test_empty_mailbox_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.mbox");
    std::fs::write(&path, b"").unwrap();
    let messages = MboxSource::new(&path).messages().unwrap();

    let result = Pipeline::new(&offline_config(dir.path()))
        .run(messages, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(PressError::NoMessages)));
}

// ─── Test 10: Cancelling mid-batch keeps finished posts ─────────────

#[tokio::test]
async fn test_cancel_mid_batch_keeps_finished_posts() {
    // Accepts nothing; any preview request would sit in its backlog.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/page", listener.local_addr().unwrap());

    let first = RawMessage::new(format!(
        "From: a@example.com\r\nSubject: Kept\r\nContent-Type: text/html\r\n\r\n\
         <p><a href=\"{url}\">read more</a></p>\r\n"
    ));
    let later = |n: usize| {
        RawMessage::new(format!(
            "From: a@example.com\r\nSubject: Later {n}\r\n\r\nbody {n}\r\n"
        ))
    };

    let dir = tempfile::tempdir().unwrap();
    let mut config = offline_config(dir.path());
    config.preview.enabled = true;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let stop_after_first = move |done: u64, _total: u64| {
        if done == 1 {
            trigger.cancel();
        }
    };

    let outcome = Pipeline::new(&config)
        .run_with_progress(
            vec![first, later(2), later(3)],
            &cancel,
            Some(&stop_after_first),
        )
        .await
        .unwrap();

    assert_eq!(outcome.posts.len(), 1);
    assert_eq!(outcome.posts[0].subject.as_deref(), Some("Kept"));
    assert!(outcome.posts[0].html.contains("read more"));
    assert_eq!(outcome.posts[0].url_previews, vec![LinkPreview::empty(url)]);

    let indices: Vec<_> = outcome.failures.iter().map(|f| f.index).collect();
    assert_eq!(indices, [1, 2]);
    for failure in &outcome.failures {
        match &failure.error {
            PressError::BatchItem { source, .. } => {
                assert!(matches!(**source, PressError::Cancelled));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    listener.set_nonblocking(true).unwrap();
    assert!(listener.accept().is_err(), "no preview request expected");
}
