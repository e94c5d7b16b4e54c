//! Duplicate detection for crawled pages
//!
//! URLs are deduplicated exactly after normalisation. Page content is compared
//! by SimHash fingerprint against every fingerprint this scheduler accepted
//! before.
//!
//! Two behaviours are kept deliberately as they are:
//!
//! - A fingerprint that is bit-for-bit identical to a prior one is *not*
//!   reported as repeated. It is cross-linked to the prior record and stored.
//! - The default near-duplicate rule compares the Hamming distance against the
//!   prior fingerprint's numeric value divided by 30, so the cutoff depends on
//!   the fingerprint itself. [`SimilarityThreshold::Bits`] gives a fixed
//!   bit-count cutoff instead.

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::debug;

use crate::crawler::filter::normalize_url;
use crate::crawler::simhash::{hamming_distance, simhash, Tokenizer, WordTokenizer};
use crate::crawler::task::PageContent;

/// When two different fingerprints count as the same page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SimilarityThreshold {
    /// `distance < prior / divisor`
    MagnitudeScaled { divisor: u64 },

    /// `distance < max_distance`
    Bits { max_distance: u32 },
}

impl Default for SimilarityThreshold {
    fn default() -> Self {
        SimilarityThreshold::MagnitudeScaled { divisor: 30 }
    }
}

impl SimilarityThreshold {
    pub fn is_near(&self, prior: u64, distance: u32) -> bool {
        match *self {
            SimilarityThreshold::MagnitudeScaled { divisor } => {
                divisor > 0 && u64::from(distance) < prior / divisor
            }
            SimilarityThreshold::Bits { max_distance } => distance < max_distance,
        }
    }
}

/// Fingerprint record of an accepted page
#[derive(Debug)]
pub struct SimHashedContent {
    pub sim_hash: u64,
    pub url: String,
    pub content: String,
    pub content_tokens: Vec<String>,

    /// Later pages with exactly this fingerprint
    repeated_with: Mutex<Vec<Weak<SimHashedContent>>>,
}

impl SimHashedContent {
    /// Exact repeats still held by the scheduler
    pub fn repeated_with(&self) -> Vec<Arc<SimHashedContent>> {
        self.repeated_with.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn link_repeat(&self, repeat: &Arc<SimHashedContent>) {
        self.repeated_with.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(repeat));
    }
}

/// Plain text of a page; markup, scripts and styles are dropped for HTML
pub fn document_text(content: &PageContent) -> String {
    if !content.is_html() {
        return content.raw_text.clone();
    }

    let document = Html::parse_document(&content.raw_text);
    let mut parts = Vec::new();

    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };

        let inside_code = node.parent()
            .and_then(|parent| parent.value().as_element())
            .is_some_and(|element| matches!(element.name(), "script" | "style" | "noscript"));

        if !inside_code && !text.trim().is_empty() {
            parts.push(text.trim().to_string());
        }
    }

    parts.join(" ")
}

/// Per-route record of seen URLs and accepted content fingerprints
pub struct DedupScheduler {
    seen_urls: DashSet<String>,
    fingerprints: DashMap<String, Arc<SimHashedContent>>,
    tokenizer: Arc<dyn Tokenizer>,
    threshold: SimilarityThreshold,
}

impl Default for DedupScheduler {
    fn default() -> Self {
        Self::new(Arc::new(WordTokenizer), SimilarityThreshold::default())
    }
}

impl DedupScheduler {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, threshold: SimilarityThreshold) -> Self {
        Self {
            seen_urls: DashSet::new(),
            fingerprints: DashMap::new(),
            tokenizer,
            threshold,
        }
    }

    /// Whether the URL was seen before; records it if not
    pub fn url_is_repeated(&self, url: &str) -> bool {
        let repeated = !self.seen_urls.insert(normalize_url(url));
        if repeated {
            debug!("URL already seen: {}", url);
        }
        repeated
    }

    /// Fingerprint a page, or `None` when it has no text
    pub fn fingerprint(&self, content: &PageContent) -> Option<SimHashedContent> {
        let text = document_text(content);
        if text.trim().is_empty() {
            return None;
        }

        let tokens = self.tokenizer.tokenize(&text);

        Some(SimHashedContent {
            sim_hash: simhash(&tokens),
            url: content.url.clone(),
            content: text,
            content_tokens: tokens,
            repeated_with: Mutex::new(Vec::new()),
        })
    }

    /// Whether the page is a near-duplicate of previously accepted content
    ///
    /// Accepted pages are stored for later comparisons.
    pub fn content_is_repeated(&self, content: &PageContent) -> bool {
        let Some(record) = self.fingerprint(content) else {
            debug!("No text on {}, skipping fingerprint", content.url);
            return false;
        };
        let record = Arc::new(record);

        let priors: Vec<Arc<SimHashedContent>> = self.fingerprints.iter()
            .map(|entry| entry.value().clone())
            .collect();

        if let Some(original) = priors.iter().find(|prior| prior.sim_hash == record.sim_hash) {
            debug!("{} has the same fingerprint as {}", record.url, original.url);
            if self.store(record.clone()) {
                original.link_repeat(&record);
            }
            return false;
        }

        for prior in &priors {
            let distance = hamming_distance(prior.sim_hash, record.sim_hash);
            if self.threshold.is_near(prior.sim_hash, distance) {
                debug!("{} is a near-duplicate of {} (distance {})", record.url, prior.url, distance);
                return true;
            }
        }

        self.store(record);
        false
    }

    /// Keep the first record seen for a URL; refetches never replace it
    fn store(&self, record: Arc<SimHashedContent>) -> bool {
        match self.fingerprints.entry(record.url.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Stored fingerprint for a URL
    pub fn record(&self, url: &str) -> Option<Arc<SimHashedContent>> {
        self.fingerprints.get(url).map(|entry| entry.value().clone())
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn seen_url_count(&self) -> usize {
        self.seen_urls.len()
    }

    /// Forget every URL and fingerprint
    pub fn close(&self) {
        self.seen_urls.clear();
        self.fingerprints.clear();
    }
}
