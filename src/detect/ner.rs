//! NER detector: transformer-based named-entity recognition
//! over chunked input, BIO-tag merging, cross-chunk dedup, and a circuit
//! breaker around the inference backend.
//!
//! The inference backend is behind the [`NerBackend`] trait so the chunking
//! and tag-merging logic can be unit-tested without an ONNX runtime or model
//! file present.

use super::{Detection, DetectorKind, resolve_non_overlap};
use crate::circuit_breaker::{Admission, CircuitBreaker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::warn;

pub const CHUNK_LEN: usize = 1000;
pub const CHUNK_OVERLAP: usize = 200;
const BREAKER_FAILURE_THRESHOLD: u32 = 3;
const BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

/// One token-classification result from the backend, already split per
/// model token with its BIO tag and per-token probability.
#[derive(Debug, Clone)]
pub struct BioToken {
    pub char_start: usize,
    pub char_end: usize,
    /// e.g. `"B-PER"`, `"I-PER"`, `"O"`.
    pub tag: String,
    pub score: f32,
}

/// Abstraction over the actual model runtime so this module's chunking/
/// merge logic is testable without `ort`/`tokenizers` in the loop.
pub trait NerBackend: Send + Sync {
    fn infer(&self, text: &str) -> anyhow::Result<Vec<BioToken>>;
}

/// A `[start, end)` character window into the original text plus its offset,
/// used to splice chunk-local NER results back into absolute coordinates.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    abs_start: usize,
    abs_end: usize,
}

/// Splits `text` (given as its full `Vec<char>`) into overlapping windows of
/// `CHUNK_LEN` characters with `CHUNK_OVERLAP` character overlap. Returns
/// one chunk covering the whole text if it's short enough to not need
/// splitting.
fn chunk_offsets(char_len: usize) -> Vec<Chunk> {
    if char_len <= CHUNK_LEN {
        return vec![Chunk { abs_start: 0, abs_end: char_len }];
    }
    let stride = CHUNK_LEN - CHUNK_OVERLAP;
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + CHUNK_LEN).min(char_len);
        chunks.push(Chunk { abs_start: start, abs_end: end });
        if end == char_len {
            break;
        }
        start += stride;
    }
    chunks
}

/// Maps a raw BIO entity label (as it appears in the model's label set,
/// e.g. `"PER"`) to the canonical category name the rest of the pipeline
/// uses for the same real-world concept (`"PERSON"`, matching
/// [`crate::detect::names`]'s hardcoded category for the same entity type).
/// Unrecognized labels pass through unchanged.
fn canonical_category(label: &str) -> String {
    match label {
        "PER" => "PERSON".to_string(),
        "ORG" => "ORGANIZATION".to_string(),
        "LOC" => "LOCATION".to_string(),
        "MISC" => "MISC".to_string(),
        other => other.to_string(),
    }
}

/// Merges consecutive `B-X`/`I-X` BIO tokens into single spans, coalescing
/// sub-word continuations and averaging their per-token probability
///. `chunk_offset` is added to every span so the
/// result lands in absolute document coordinates.
fn merge_bio_tags(tokens: &[BioToken], chunk_offset: usize) -> Vec<Detection> {
    let mut out = Vec::new();
    let mut current: Option<(usize, usize, String, Vec<f32>)> = None;

    let flush = |current: Option<(usize, usize, String, Vec<f32>)>, out: &mut Vec<Detection>| {
        if let Some((start, end, label, scores)) = current {
            let avg = scores.iter().sum::<f32>() / scores.len() as f32;
            out.push(Detection::new(start, end, canonical_category(&label), avg, "", DetectorKind::Ner));
        }
    };

    for tok in tokens {
        let (prefix, label) = match tok.tag.split_once('-') {
            Some((p, l)) => (p, l),
            None => ("O", ""),
        };
        match prefix {
            "B" => {
                flush(current.take(), &mut out);
                current = Some((
                    chunk_offset + tok.char_start,
                    chunk_offset + tok.char_end,
                    label.to_string(),
                    vec![tok.score],
                ));
            }
            "I" => {
                if let Some((_, end, cur_label, scores)) = current.as_mut() {
                    if cur_label == label {
                        *end = chunk_offset + tok.char_end;
                        scores.push(tok.score);
                        continue;
                    }
                }
                flush(current.take(), &mut out);
                current = None;
            }
            _ => {
                flush(current.take(), &mut out);
                current = None;
            }
        }
    }
    flush(current, &mut out);
    out
}

/// Drops cross-chunk duplicate spans: when two spans cover the same
/// absolute region, keeps the higher-confidence one (tie -> earlier chunk,
/// which `detections` is already ordered by, so `dedup_by` on a stable sort
/// keeps the first).
fn dedup_cross_chunk(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.end.cmp(&b.end))
            .then(b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
    });
    let mut out: Vec<Detection> = Vec::with_capacity(detections.len());
    for d in detections {
        if let Some(last) = out.last() {
            if last.start == d.start && last.end == d.end {
                continue;
            }
        }
        out.push(d);
    }
    out
}

pub struct NerDetector {
    backend: OnceCell<Arc<dyn NerBackend>>,
    loader: Box<dyn Fn() -> anyhow::Result<Arc<dyn NerBackend>> + Send + Sync>,
    breaker: CircuitBreaker,
}

impl NerDetector {
    pub fn new(loader: impl Fn() -> anyhow::Result<Arc<dyn NerBackend>> + Send + Sync + 'static) -> Self {
        Self {
            backend: OnceCell::new(),
            loader: Box::new(loader),
            breaker: CircuitBreaker::new("ner", BREAKER_FAILURE_THRESHOLD, BREAKER_COOLDOWN),
        }
    }

    /// Lazily loads the backend on first call (single-flight via `OnceCell`);
    /// load failure is treated the same as an inference failure and routes
    /// through the circuit breaker.
    async fn backend(&self) -> anyhow::Result<Arc<dyn NerBackend>> {
        self.backend
            .get_or_try_init(|| async { (self.loader)() })
            .await
            .cloned()
    }

    pub async fn detect(&self, text: &str, min_confidence: f32) -> Vec<Detection> {
        if matches!(self.breaker.guard(), Admission::Open) {
            return Vec::new();
        }

        let backend = match self.backend().await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "NER model failed to load");
                self.breaker.record_failure();
                return Vec::new();
            }
        };

        let char_len = text.chars().count();
        let chars: Vec<char> = text.chars().collect();
        let mut raw = Vec::new();
        let mut any_failure = false;

        for chunk in chunk_offsets(char_len) {
            let slice: String = chars[chunk.abs_start..chunk.abs_end].iter().collect();
            match backend.infer(&slice) {
                Ok(tokens) => {
                    raw.extend(merge_bio_tags(&tokens, chunk.abs_start));
                }
                Err(e) => {
                    warn!(error = %e, "NER inference failed for chunk");
                    any_failure = true;
                }
            }
        }

        if any_failure && raw.is_empty() {
            self.breaker.record_failure();
            return Vec::new();
        }
        self.breaker.record_success();

        raw.retain(|d| d.confidence >= min_confidence);
        let deduped = dedup_cross_chunk(raw);
        let mut resolved = resolve_non_overlap(deduped);
        for d in &mut resolved {
            d.text = chars[d.start..d.end].iter().collect();
        }
        resolved
    }
}

#[cfg(feature = "ner")]
pub mod ort_backend {
    use super::{BioToken, NerBackend};
    use anyhow::{Context, Result};
    use ort::session::Session;
    use ort::session::builder::GraphOptimizationLevel;
    use std::path::Path;
    use tokenizers::Tokenizer;

    /// Real inference backend over an ONNX token-classification model and
    /// its matching HuggingFace tokenizer, lazy-loaded by [`super::NerDetector`].
    pub struct OrtNerBackend {
        session: Session,
        tokenizer: Tokenizer,
        id_to_label: Vec<String>,
    }

    impl OrtNerBackend {
        pub fn load(model_path: &Path, tokenizer_path: &Path, id_to_label: Vec<String>) -> Result<Self> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path)
                .with_context(|| format!("loading NER model from {}", model_path.display()))?;
            let tokenizer = Tokenizer::from_file(tokenizer_path)
                .map_err(|e| anyhow::anyhow!("loading tokenizer from {}: {e}", tokenizer_path.display()))?;
            Ok(Self { session, tokenizer, id_to_label })
        }
    }

    impl NerBackend for OrtNerBackend {
        fn infer(&self, text: &str) -> Result<Vec<BioToken>> {
            let encoding = self
                .tokenizer
                .encode(text, true)
                .map_err(|e| anyhow::anyhow!("tokenizer encode failed: {e}"))?;
            let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
            let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| m as i64).collect();
            let offsets = encoding.get_offsets();
            let seq_len = ids.len();

            let input_ids = ort::value::Value::from_array(([1, seq_len], ids))?;
            let attention_mask = ort::value::Value::from_array(([1, seq_len], mask))?;

            let outputs = self
                .session
                .run(ort::inputs!["input_ids" => input_ids, "attention_mask" => attention_mask])
                .context("NER model inference failed")?;
            let (shape, logits) = outputs[0].try_extract_raw_tensor::<f32>()?;
            let num_labels = *shape.last().unwrap_or(&(self.id_to_label.len() as i64)) as usize;

            let mut tokens = Vec::with_capacity(seq_len);
            for (i, &(char_start, char_end)) in offsets.iter().enumerate().take(seq_len) {
                if char_start == char_end {
                    continue; // special tokens carry empty offsets
                }
                let row = &logits[i * num_labels..(i + 1) * num_labels];
                let (best_idx, best_logit) = row
                    .iter()
                    .enumerate()
                    .fold((0usize, f32::MIN), |acc, (idx, &v)| if v > acc.1 { (idx, v) } else { acc });
                let score = softmax_prob(row, best_idx, best_logit);
                let tag = self
                    .id_to_label
                    .get(best_idx)
                    .cloned()
                    .unwrap_or_else(|| "O".to_string());
                tokens.push(BioToken { char_start, char_end, tag, score });
            }
            Ok(tokens)
        }
    }

    fn softmax_prob(row: &[f32], best_idx: usize, best_logit: f32) -> f32 {
        let sum: f32 = row.iter().map(|&v| (v - best_logit).exp()).sum();
        if sum <= 0.0 { 1.0 } else { 1.0 / sum * (row[best_idx] - best_logit).exp() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubBackend {
        calls: AtomicU32,
        fail: bool,
    }

    impl NerBackend for StubBackend {
        fn infer(&self, text: &str) -> anyhow::Result<Vec<BioToken>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("inference exploded");
            }
            if let Some(pos) = text.find("Dave") {
                Ok(vec![BioToken {
                    char_start: pos,
                    char_end: pos + 4,
                    tag: "B-PER".to_string(),
                    score: 0.92,
                }])
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[test]
    fn chunking_splits_long_text() {
        let chunks = chunk_offsets(2500);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].abs_start, 0);
        assert_eq!(chunks.last().unwrap().abs_end, 2500);
    }

    #[test]
    fn chunking_keeps_short_text_whole() {
        let chunks = chunk_offsets(50);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn merge_bio_combines_continuation_tokens() {
        let tokens = vec![
            BioToken { char_start: 0, char_end: 4, tag: "B-PER".into(), score: 0.9 },
            BioToken { char_start: 4, char_end: 10, tag: "I-PER".into(), score: 0.8 },
        ];
        let merged = merge_bio_tags(&tokens, 0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, 0);
        assert_eq!(merged[0].end, 10);
        assert!((merged[0].confidence - 0.85).abs() < 1e-6);
    }

    #[test]
    fn merge_bio_breaks_on_label_change() {
        let tokens = vec![
            BioToken { char_start: 0, char_end: 4, tag: "B-PER".into(), score: 0.9 },
            BioToken { char_start: 5, char_end: 9, tag: "B-ORG".into(), score: 0.9 },
        ];
        let merged = merge_bio_tags(&tokens, 0);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn dedup_keeps_higher_confidence_duplicate() {
        let a = Detection::new(5, 9, "PER", 0.7, "Dave", DetectorKind::Ner);
        let b = Detection::new(5, 9, "PER", 0.95, "Dave", DetectorKind::Ner);
        let out = dedup_cross_chunk(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn detect_runs_backend_across_chunks() {
        let detector = NerDetector::new(|| {
            Ok(Arc::new(StubBackend { calls: AtomicU32::new(0), fail: false }) as Arc<dyn NerBackend>)
        });
        let found = detector.detect("Hi, this is Dave calling", 0.5).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].category, "PERSON");
    }

    #[test]
    fn canonical_category_maps_known_labels_and_passes_through_unknown() {
        assert_eq!(canonical_category("PER"), "PERSON");
        assert_eq!(canonical_category("ORG"), "ORGANIZATION");
        assert_eq!(canonical_category("LOC"), "LOCATION");
        assert_eq!(canonical_category("MISC"), "MISC");
        assert_eq!(canonical_category("WEIRD"), "WEIRD");
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_repeated_failures() {
        let detector = NerDetector::new(|| {
            Ok(Arc::new(StubBackend { calls: AtomicU32::new(0), fail: true }) as Arc<dyn NerBackend>)
        });
        for _ in 0..BREAKER_FAILURE_THRESHOLD {
            let found = detector.detect("anything", 0.5).await;
            assert!(found.is_empty());
        }
        // breaker should now be open; a subsequent call should short-circuit
        // without the backend ever running (can't observe directly here, but
        // the detector still returns empty without panicking).
        let found = detector.detect("anything", 0.5).await;
        assert!(found.is_empty());
    }
}
