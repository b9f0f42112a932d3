//! Batch coordinator: parse, classify, persist assets and fetch previews for
//! a batch of raw messages.
//!
//! Failures are isolated per message and per asset. A bad message is
//! reported in [`BatchOutcome::failures`] and left out of the output; the
//! rest of the batch carries on.

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::{AssetStore, PersistOutcome};
use crate::classify::{policy_from_config, PostClassifier};
use crate::config::Config;
use crate::error::{PressError, Result};
use crate::model::{LinkPreview, Post, RawMessage};
use crate::parser::message::MessageParser;
use crate::preview::LinkPreviewFetcher;
use crate::sanitize::HtmlSanitizer;

/// A message that was excluded from the output.
#[derive(Debug)]
pub struct BatchFailure {
    /// Position of the message in the input batch.
    pub index: usize,
    /// Always a [`PressError::BatchItem`].
    pub error: PressError,
}

/// An image that could not be written. Its post is still published.
#[derive(Debug)]
pub struct AssetFailure {
    pub post_uid: String,
    pub image_id: String,
    pub error: PressError,
}

/// Result of [`Pipeline::run`].
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Finalized posts, in source order.
    pub posts: Vec<Post>,
    pub failures: Vec<BatchFailure>,
    pub asset_failures: Vec<AssetFailure>,
}

impl BatchOutcome {
    /// `true` when every message and every asset went through.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.asset_failures.is_empty()
    }
}

/// Drives [`MessageParser`], [`PostClassifier`] and [`LinkPreviewFetcher`]
/// over a batch.
#[derive(Debug)]
pub struct Pipeline {
    parser: MessageParser,
    classifier: PostClassifier,
    fetcher: LinkPreviewFetcher,
    persist_assets: bool,
    overwrite_assets: bool,
}

impl Pipeline {
    /// Build every stage from configuration.
    pub fn new(config: &Config) -> Self {
        let parser = MessageParser::new(
            AssetStore::from_config(&config.publish),
            HtmlSanitizer::from_config(&config.sanitize),
        );
        Self {
            parser,
            classifier: PostClassifier::new(policy_from_config(&config.layout)),
            fetcher: LinkPreviewFetcher::new(&config.preview),
            persist_assets: config.publish.persist_assets,
            overwrite_assets: config.publish.overwrite_assets,
        }
    }

    pub fn assets(&self) -> &AssetStore {
        self.parser.assets()
    }

    /// Process a batch. See [`Pipeline::run_with_progress`].
    pub async fn run(
        &self,
        messages: Vec<RawMessage>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        self.run_with_progress(messages, cancel, None).await
    }

    /// Process a batch, reporting `(done, total)` after each message.
    ///
    /// Returns [`PressError::NoMessages`] for an empty batch and
    /// [`PressError::Cancelled`] if `cancel` fired before any message was
    /// parsed. Cancellation later on stops parsing and preview fetching; the
    /// posts finalized so far are returned, unparsed messages are listed as
    /// failures and unfetched previews hold only their URL.
    pub async fn run_with_progress(
        &self,
        messages: Vec<RawMessage>,
        cancel: &CancellationToken,
        progress: Option<&(dyn Fn(u64, u64) + Sync)>,
    ) -> Result<BatchOutcome> {
        if messages.is_empty() {
            return Err(PressError::NoMessages);
        }
        if cancel.is_cancelled() {
            return Err(PressError::Cancelled);
        }

        let total = messages.len() as u64;
        info!(messages = total, "Processing batch");

        let mut outcome = BatchOutcome::default();
        for (index, raw) in messages.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(index = index, "Run cancelled, leaving remaining messages unprocessed");
                for skipped in index..messages.len() {
                    outcome.failures.push(BatchFailure {
                        index: skipped,
                        error: PressError::batch_item(skipped, PressError::Cancelled),
                    });
                }
                break;
            }

            match self.parser.parse(raw) {
                Ok(parsed) => {
                    for e in &parsed.part_errors {
                        debug!(index = index, error = %e, "Part skipped");
                    }
                    let post = self.classifier.classify(parsed, &self.parser);
                    if self.persist_assets {
                        self.persist_images(&post, &mut outcome.asset_failures);
                    }
                    outcome.posts.push(post);
                }
                Err(e) => {
                    warn!(index = index, error = %e, "Skipping message");
                    outcome.failures.push(BatchFailure {
                        index,
                        error: PressError::batch_item(index, e),
                    });
                }
            }

            if let Some(cb) = progress {
                cb(index as u64 + 1, total);
            }
        }

        self.attach_previews(&mut outcome.posts, cancel).await;

        info!(
            posts = outcome.posts.len(),
            failed = outcome.failures.len(),
            asset_failures = outcome.asset_failures.len(),
            "Batch complete"
        );
        Ok(outcome)
    }

    fn persist_images(&self, post: &Post, failures: &mut Vec<AssetFailure>) {
        for image in &post.images {
            match self.assets().persist_image(image, self.overwrite_assets) {
                Ok(PersistOutcome::Written) => {
                    debug!(id = %image.id, path = %image.storage_path.display(), "Image published");
                }
                Ok(PersistOutcome::Skipped) => {}
                Err(e) => {
                    warn!(uid = %post.uid, id = %image.id, error = %e, "Could not write image");
                    failures.push(AssetFailure {
                        post_uid: post.uid.clone(),
                        image_id: image.id.clone(),
                        error: e,
                    });
                }
            }
        }
    }

    /// Fetch each distinct link of the batch once and hand the previews back
    /// to every post that references it.
    async fn attach_previews(&self, posts: &mut [Post], cancel: &CancellationToken) {
        let mut seen = HashSet::new();
        let urls: Vec<String> = posts
            .iter()
            .flat_map(|p| p.link_urls())
            .filter(|url| seen.insert(url.to_string()))
            .map(str::to_string)
            .collect();
        if urls.is_empty() {
            return;
        }

        debug!(links = urls.len(), "Fetching link previews");
        let fetched: HashMap<String, LinkPreview> = self
            .fetcher
            .fetch_all(urls, cancel)
            .await
            .into_iter()
            .map(|p| (p.source_url.clone(), p))
            .collect();

        for post in posts.iter_mut() {
            for preview in &mut post.url_previews {
                if let Some(found) = fetched.get(&preview.source_url) {
                    preview.clone_from(found);
                }
            }
        }
    }
}
