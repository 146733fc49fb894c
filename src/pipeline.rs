//! The redaction pipeline: orders the four detectors,
//! enforces non-overlap across layers, mints/reuses tokens, and splices the
//! sanitized string.

use crate::config::{ConfigSnapshot, DictionaryEntry};
use crate::detect::dictionary::DictionaryMatcher;
use crate::detect::names::{NameEntry, NameGazetteer};
use crate::detect::{ClaimMask, Detection, resolve_non_overlap};
use crate::store::TokenBinding;
use crate::tokenizer;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::Instant;

#[cfg(feature = "ner")]
use crate::detect::ner::NerDetector;

/// Per-layer hit counts plus timing, emitted alongside every `redact` call
///.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PipelineStats {
    pub dictionary_hits: usize,
    pub ner_hits: usize,
    pub regex_hits: usize,
    pub name_hits: usize,
    pub total_detections: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct RedactResult {
    pub sanitized: String,
    pub bindings: Vec<TokenBinding>,
    pub stats: PipelineStats,
}

pub struct Pipeline {
    // Behind its own lock (rather than requiring `&mut Pipeline` through
    // `PipelineHandle::publish`) so a dictionary hot-reload doesn't need to
    // rebuild — and thereby drop — an already-loaded NER model.
    dictionary: RwLock<DictionaryMatcher>,
    names: NameGazetteer,
    #[cfg(feature = "ner")]
    ner: Option<NerDetector>,
}

impl Pipeline {
    /// `name_entries` is the operator-imported gazetteer (see
    /// `anonamoose names import`); an empty slice falls back to the small
    /// embedded placeholder list.
    pub fn new(dictionary_entries: &[DictionaryEntry], name_entries: &[NameEntry]) -> Self {
        Self {
            dictionary: RwLock::new(DictionaryMatcher::build(dictionary_entries)),
            names: NameGazetteer::build(name_entries),
            #[cfg(feature = "ner")]
            ner: None,
        }
    }

    #[cfg(feature = "ner")]
    pub fn with_ner(mut self, ner: NerDetector) -> Self {
        self.ner = Some(ner);
        self
    }

    pub fn rebuild_dictionary(&self, entries: &[DictionaryEntry]) {
        let mut guard = self.dictionary.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = DictionaryMatcher::build(entries);
    }

    /// Runs the four-layer pipeline over `text` against the given settings
    /// snapshot and the set of originals already bound in the current
    /// session (used so a re-mention within the same session reuses its
    /// existing token rather than minting a fresh one).
    pub async fn redact(
        &self,
        text: &str,
        settings: &ConfigSnapshot,
        existing_bindings: &[TokenBinding],
    ) -> RedactResult {
        let started = Instant::now();
        let cfg = settings.current();
        let mut mask = ClaimMask::new();
        let mut stats = PipelineStats::default();

        // 1. Dictionary -> NER -> Regex -> Names.
        let dictionary_detections = if cfg.enable_dictionary {
            let d = self
                .dictionary
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .detect_masked(text, &mask);
            mask.extend(&d);
            stats.dictionary_hits = d.len();
            d
        } else {
            Vec::new()
        };

        #[cfg(feature = "ner")]
        let ner_detections = if cfg.enable_ner {
            match &self.ner {
                Some(ner) => {
                    let raw = ner.detect(text, cfg.ner_min_confidence).await;
                    let filtered: Vec<Detection> =
                        raw.into_iter().filter(|d| !mask.is_claimed(d.start, d.end)).collect();
                    mask.extend(&filtered);
                    stats.ner_hits = filtered.len();
                    filtered
                }
                None => Vec::new(),
            }
        } else {
            Vec::new()
        };
        #[cfg(not(feature = "ner"))]
        let ner_detections: Vec<Detection> = Vec::new();

        let regex_detections = if cfg.enable_regex {
            let d = crate::detect::regex_detector::detect_masked(text, cfg.locale, &mask);
            mask.extend(&d);
            stats.regex_hits = d.len();
            d
        } else {
            Vec::new()
        };

        let name_detections = if cfg.enable_names {
            let d = self.names.detect_masked(text, &mask);
            stats.name_hits = d.len();
            d
        } else {
            Vec::new()
        };

        // 3. Re-enforce (I1) by longest-non-overlap over the combined list.
        let mut combined = Vec::with_capacity(
            dictionary_detections.len() + ner_detections.len() + regex_detections.len() + name_detections.len(),
        );
        combined.extend(dictionary_detections);
        combined.extend(ner_detections);
        combined.extend(regex_detections);
        combined.extend(name_detections);
        let mut detections = resolve_non_overlap(combined);
        detections.sort_by_key(|d| d.start);
        stats.total_detections = detections.len();

        // 4. Mint/reuse tokens, left-to-right.
        let mut bindings: Vec<TokenBinding> = Vec::new();
        let mut minted_tokens: HashSet<String> = existing_bindings.iter().map(|b| b.token.clone()).collect();
        let mut resolved: Vec<(Detection, String)> = Vec::with_capacity(detections.len());

        for detection in detections {
            let existing_token = existing_bindings
                .iter()
                .chain(bindings.iter())
                .find(|b| b.original == detection.text)
                .map(|b| b.token.clone());

            let token = match existing_token {
                Some(t) => t,
                None => {
                    let minted = minted_tokens.clone();
                    let new_token = tokenizer::mint(
                        cfg.placeholder_prefix,
                        cfg.placeholder_suffix,
                        &|candidate| minted.contains(candidate),
                    );
                    minted_tokens.insert(new_token.clone());
                    bindings.push(TokenBinding {
                        token: new_token.clone(),
                        original: detection.text.clone(),
                        detector_kind: detection.detector.as_str().to_string(),
                        category: detection.category.clone(),
                        meta: None,
                    });
                    new_token
                }
            };
            resolved.push((detection, token));
        }

        // 5. Splice tokens into the original text in reverse span order.
        let chars: Vec<char> = text.chars().collect();
        let mut sanitized_chars: Vec<char> = chars.clone();
        for (detection, token) in resolved.iter().rev() {
            sanitized_chars.splice(detection.start..detection.end, token.chars());
        }
        let sanitized: String = sanitized_chars.into_iter().collect();

        stats.elapsed_ms = started.elapsed().as_millis() as u64;

        RedactResult { sanitized, bindings, stats }
    }
}

/// A process-wide, read-mostly handle to the pipeline, mirroring
/// [`ConfigSnapshot`]'s publish/snapshot pattern (spec.md §5 "Shared-resource
/// policy"): the dictionary matcher is rebuilt under a writer lock on
/// configuration change, while request handlers take a cheap `Arc` snapshot
/// at layer entry rather than holding a lock across the `await` points in
/// `redact` (NER inference, in particular).
#[derive(Clone)]
pub struct PipelineHandle {
    inner: Arc<RwLock<Arc<Pipeline>>>,
}

impl PipelineHandle {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { inner: Arc::new(RwLock::new(Arc::new(pipeline))) }
    }

    pub fn current(&self) -> Arc<Pipeline> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    pub fn publish(&self, pipeline: Pipeline) {
        let mut guard = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Arc::new(pipeline);
    }
}
