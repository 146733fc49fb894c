//! Dictionary detector: exact/case-folded multi-word matches
//! against an operator-managed term list. Guaranteed redaction — runs first
//! and is never pre-empted by a probabilistic layer.

use super::{ClaimMask, Detection, DetectorKind, byte_to_char_offset, resolve_non_overlap};
use crate::config::DictionaryEntry;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// A compiled matcher over a fixed set of dictionary entries. Two separate
/// Aho-Corasick automatons are built — one case-insensitive, one not — since
/// `aho-corasick` applies case-folding per-automaton rather than per-pattern
/// (mirrors the two-phase construction in oxicrab's leak detector, adapted
/// from "literal prefix scan" to "literal whole-term scan").
pub struct DictionaryMatcher {
    case_insensitive: AhoCorasick,
    ci_entries: Vec<DictionaryEntry>,
    case_sensitive: AhoCorasick,
    cs_entries: Vec<DictionaryEntry>,
}

impl DictionaryMatcher {
    pub fn build(entries: &[DictionaryEntry]) -> Self {
        let ci_entries: Vec<DictionaryEntry> = entries
            .iter()
            .filter(|e| !e.case_sensitive)
            .cloned()
            .collect();
        let cs_entries: Vec<DictionaryEntry> = entries
            .iter()
            .filter(|e| e.case_sensitive)
            .cloned()
            .collect();

        let case_insensitive = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(ci_entries.iter().map(|e| &e.term))
            .expect("aho-corasick automaton should build from dictionary terms");
        let case_sensitive = AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostLongest)
            .build(cs_entries.iter().map(|e| &e.term))
            .expect("aho-corasick automaton should build from dictionary terms");

        Self {
            case_insensitive,
            ci_entries,
            case_sensitive,
            cs_entries,
        }
    }

    /// Runs both automatons over `text`, returning non-overlapping detections
    /// (longest match wins, tie broken by earliest start).
    pub fn detect(&self, text: &str) -> Vec<Detection> {
        let mut raw = Vec::new();
        for m in self.case_insensitive.find_iter(text) {
            let entry = &self.ci_entries[m.pattern().as_usize()];
            raw.push(make_detection(text, m.start(), m.end(), entry));
        }
        for m in self.case_sensitive.find_iter(text) {
            let entry = &self.cs_entries[m.pattern().as_usize()];
            raw.push(make_detection(text, m.start(), m.end(), entry));
        }
        resolve_non_overlap(raw)
    }

    /// Same as [`detect`] but skips any span already claimed by a prior
    /// pipeline layer. Unused when dictionary runs
    /// first (its default position), kept for a future re-ordering.
    pub fn detect_masked(&self, text: &str, mask: &ClaimMask) -> Vec<Detection> {
        self.detect(text)
            .into_iter()
            .filter(|d| !mask.is_claimed(d.start, d.end))
            .collect()
    }
}

fn make_detection(text: &str, byte_start: usize, byte_end: usize, entry: &DictionaryEntry) -> Detection {
    let start = byte_to_char_offset(text, byte_start);
    let end = byte_to_char_offset(text, byte_end);
    Detection::new(
        start,
        end,
        format!("DICTIONARY:{}", entry.category),
        1.0,
        &text[byte_start..byte_end],
        DetectorKind::Dictionary,
    )
}
