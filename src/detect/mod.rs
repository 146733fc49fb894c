//! The four detection layers plus the shared
//! `Detection` type and non-overlap resolution algorithm they all use.

pub mod checksums;
pub mod dictionary;
#[cfg(feature = "ner")]
pub mod ner;
pub mod names;
pub mod regex_detector;

use crate::config::DictionaryEntry;

/// A half-open character span `[start, end)` plus the category/confidence/
/// detector that produced it. Character offsets,
/// never byte offsets — multi-byte code points must not desync spans.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub start: usize,
    pub end: usize,
    pub category: String,
    pub confidence: f32,
    pub text: String,
    pub detector: DetectorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Dictionary,
    Ner,
    Regex,
    Name,
}

impl DetectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dictionary => "DICTIONARY",
            Self::Ner => "NER",
            Self::Regex => "REGEX",
            Self::Name => "NAME",
        }
    }
}

impl Detection {
    pub fn new(
        start: usize,
        end: usize,
        category: impl Into<String>,
        confidence: f32,
        text: impl Into<String>,
        detector: DetectorKind,
    ) -> Self {
        debug_assert!(start < end, "detection spans must be non-empty");
        Self {
            start,
            end,
            category: category.into(),
            confidence,
            text: text.into(),
            detector,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Detection) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A set of claimed (already-detected) character ranges, consulted by each
/// later pipeline layer so that a new detection intersecting a prior claim
/// is discarded outright.
#[derive(Debug, Default, Clone)]
pub struct ClaimMask {
    ranges: Vec<(usize, usize)>,
}

impl ClaimMask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_detections(detections: &[Detection]) -> Self {
        Self {
            ranges: detections.iter().map(|d| (d.start, d.end)).collect(),
        }
    }

    pub fn is_claimed(&self, start: usize, end: usize) -> bool {
        self.ranges.iter().any(|&(s, e)| start < e && s < end)
    }

    pub fn extend(&mut self, detections: &[Detection]) {
        self.ranges
            .extend(detections.iter().map(|d| (d.start, d.end)));
    }
}

/// The longest-non-overlap resolution rule shared by §4.3's within-layer
/// pass and §4.6 step 3's whole-list pass: sort by `(start, -length)`, scan
/// linearly, accept if `start >= last accepted end`; otherwise keep the
/// longer span (tie -> earlier start, tie -> higher confidence).
pub fn resolve_non_overlap(mut detections: Vec<Detection>) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| b.len().cmp(&a.len()))
            .then(
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut accepted: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        match accepted.last() {
            None => accepted.push(candidate),
            Some(last) if candidate.start >= last.end => accepted.push(candidate),
            Some(last) => {
                let keep_candidate = candidate.len() > last.len()
                    || (candidate.len() == last.len() && candidate.start < last.start)
                    || (candidate.len() == last.len()
                        && candidate.start == last.start
                        && candidate.confidence > last.confidence);
                if keep_candidate {
                    accepted.pop();
                    accepted.push(candidate);
                }
            }
        }
    }
    accepted
}

/// Whether `entry` is enabled for the active locale: region-neutral categories always run; regional ones are
/// filtered by prefix (`AU_`, `NZ_`, `UK_`, `US_`).
pub fn category_matches_locale(category: &str, locale: Option<crate::config::Locale>) -> bool {
    let prefix = match category.split('_').next() {
        Some(p) if ["AU", "NZ", "UK", "US"].contains(&p) => p,
        _ => return true,
    };
    match locale {
        None => true,
        Some(l) => l.as_str() == prefix,
    }
}

/// Converts a byte offset into `text` to a character offset. All detectors
/// that run on top of `regex`/`aho_corasick` (both byte-indexed) must pass
/// their match offsets through this before constructing a [`Detection`], so
/// that spans compose correctly with the NER layer's char-indexed spans
///.
pub fn byte_to_char_offset(text: &str, byte_offset: usize) -> usize {
    text[..byte_offset].chars().count()
}

/// Shared Aho-Corasick-driven exact/case-folded matcher used by the
/// dictionary layer; factored out here so other layers (e.g. a future
/// common-word check in the name detector) can share the construction cost.
pub fn dictionary_entries_by_case(
    entries: &[DictionaryEntry],
) -> (Vec<&DictionaryEntry>, Vec<&DictionaryEntry>) {
    let (ci, cs): (Vec<_>, Vec<_>) = entries.iter().partition(|e| !e.case_sensitive);
    (ci, cs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(start: usize, end: usize, conf: f32) -> Detection {
        Detection::new(start, end, "X", conf, "x", DetectorKind::Regex)
    }

    #[test]
    fn non_overlap_keeps_longest() {
        let out = resolve_non_overlap(vec![d(0, 5, 0.9), d(2, 4, 0.95)]);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].start, out[0].end), (0, 5));
    }

    #[test]
    fn non_overlap_tie_breaks_earlier_start() {
        let out = resolve_non_overlap(vec![d(3, 8, 0.9), d(0, 5, 0.9)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].start, 0);
    }

    #[test]
    fn non_overlap_disjoint_detections_both_kept() {
        let out = resolve_non_overlap(vec![d(0, 2, 0.9), d(5, 8, 0.9)]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn claim_mask_detects_intersection() {
        let mask = ClaimMask::from_detections(&[d(2, 6, 0.9)]);
        assert!(mask.is_claimed(0, 3));
        assert!(!mask.is_claimed(6, 9));
    }

    #[test]
    fn locale_filter_allows_neutral_categories() {
        assert!(category_matches_locale(
            "EMAIL",
            Some(crate::config::Locale::Nz)
        ));
        assert!(!category_matches_locale(
            "AU_TFN",
            Some(crate::config::Locale::Nz)
        ));
        assert!(category_matches_locale("AU_TFN", None));
    }
}
