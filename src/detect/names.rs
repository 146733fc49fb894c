//! Name detector: first-name gazetteer safety net, cross-
//! checked against a common-word list so ordinary vocabulary that happens to
//! double as a given name doesn't get flagged.

use super::{ClaimMask, Detection, DetectorKind, resolve_non_overlap};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// Frequency class used to scale confidence within the 0.50-0.85
/// band: very common given names score lower (more likely to be an
/// ordinary word in context), rare ones score higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyClass {
    Common,
    Moderate,
    Rare,
}

impl FrequencyClass {
    fn confidence(self) -> f32 {
        match self {
            Self::Common => 0.50,
            Self::Moderate => 0.65,
            Self::Rare => 0.85,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Common => "common",
            Self::Moderate => "moderate",
            Self::Rare => "rare",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "common" => Some(Self::Common),
            "moderate" => Some(Self::Moderate),
            "rare" => Some(Self::Rare),
            _ => None,
        }
    }
}

/// An operator-managed gazetteer entry, loaded from the local `names` table
/// the same way [`crate::config::DictionaryEntry`] is loaded from the
/// `dictionary` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NameEntry {
    pub name: String,
    pub frequency: FrequencyClass,
}

pub struct NameGazetteer {
    /// lowercased name -> frequency class
    names: std::collections::HashMap<String, FrequencyClass>,
    common_words: HashSet<String>,
}

impl NameGazetteer {
    pub fn new(names: impl IntoIterator<Item = (String, FrequencyClass)>, common_words: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names
                .into_iter()
                .map(|(n, f)| (n.to_lowercase(), f))
                .collect(),
            common_words: common_words.into_iter().map(|w| w.to_lowercase()).collect(),
        }
    }

    /// Builds a gazetteer from the embedded default name/common-word lists
    /// (see `crate::detect::names::defaults`).
    pub fn default_gazetteer() -> Self {
        Self::new(defaults::NAMES.iter().map(|&(n, f)| (n.to_string(), f)), defaults::COMMON_WORDS.iter().map(|&w| w.to_string()))
    }

    /// Builds a gazetteer from operator-supplied entries (loaded from the
    /// local `names` table), falling back to the embedded placeholder list
    /// when none have been imported. The common-word override list is
    /// always the embedded one; it's a grammar safety net, not something an
    /// operator is expected to curate per name.
    pub fn build(entries: &[NameEntry]) -> Self {
        if entries.is_empty() {
            return Self::default_gazetteer();
        }
        Self::new(
            entries.iter().map(|e| (e.name.clone(), e.frequency)),
            defaults::COMMON_WORDS.iter().map(|&w| w.to_string()),
        )
    }

    pub fn detect(&self, text: &str) -> Vec<Detection> {
        let mut raw = Vec::new();
        // `unicode_word_indices` gives (byte_offset, word) pairs using
        // Unicode word-boundary rules (UAX #29), satisfying the "Unicode
        // word boundaries" requirement without hand-rolling segmentation.
        let chars: Vec<char> = text.chars().collect();
        let mut char_offset_for_byte = vec![0usize; text.len() + 1];
        {
            let mut idx = 0;
            for (byte_pos, _) in text.char_indices() {
                char_offset_for_byte[byte_pos] = idx;
                idx += 1;
            }
            char_offset_for_byte[text.len()] = chars.len();
        }

        for (byte_start, word) in text.unicode_word_indices() {
            let lower = word.to_lowercase();
            if self.common_words.contains(&lower) {
                continue;
            }
            let Some(freq) = self.names.get(&lower) else {
                continue;
            };
            let byte_end = byte_start + word.len();
            let start = char_offset_for_byte[byte_start];
            let end = char_offset_for_byte[byte_end];
            raw.push(Detection::new(
                start,
                end,
                "PERSON",
                freq.confidence(),
                word,
                DetectorKind::Name,
            ));
        }
        resolve_non_overlap(raw)
    }

    pub fn detect_masked(&self, text: &str, mask: &ClaimMask) -> Vec<Detection> {
        self.detect(text)
            .into_iter()
            .filter(|d| !mask.is_claimed(d.start, d.end))
            .collect()
    }
}

/// A small embedded seed list standing in for a full ~10,000-entry
/// gazetteer; operators supply the full list via `anonamoose names import`
/// (see [`NameEntry`] and `crate::config::persist::LocalDb::load_names`),
/// which this module falls back away from once any entries exist.
pub mod defaults {
    use super::FrequencyClass;

    pub const NAMES: &[(&str, FrequencyClass)] = &[
        ("james", FrequencyClass::Common),
        ("john", FrequencyClass::Common),
        ("sarah", FrequencyClass::Moderate),
        ("dave", FrequencyClass::Moderate),
        ("priya", FrequencyClass::Rare),
        ("mohammed", FrequencyClass::Moderate),
        ("aroha", FrequencyClass::Rare),
        ("kiri", FrequencyClass::Rare),
        ("olivia", FrequencyClass::Moderate),
        ("liam", FrequencyClass::Moderate),
    ];

    pub const COMMON_WORDS: &[&str] = &[
        "may", "will", "mark", "grace", "faith", "hope", "summer", "rose", "jade", "april",
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_known_name() {
        let gaz = NameGazetteer::default_gazetteer();
        let found = gaz.detect("please ask Priya to call back");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "Priya");
        assert_eq!(found[0].category, "PERSON");
    }

    #[test]
    fn build_falls_back_to_defaults_when_no_entries() {
        let gaz = NameGazetteer::build(&[]);
        let found = gaz.detect("ask Priya to call back");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn build_uses_operator_supplied_entries_instead_of_defaults() {
        let entries = vec![NameEntry { name: "Zolastra".to_string(), frequency: FrequencyClass::Rare }];
        let gaz = NameGazetteer::build(&entries);
        assert_eq!(gaz.detect("ask Zolastra to call back").len(), 1);
        // "Priya" is in the embedded defaults but must not leak in once an
        // operator list has been imported.
        assert!(gaz.detect("ask Priya to call back").is_empty());
    }

    #[test]
    fn frequency_class_parse_roundtrip() {
        for f in [FrequencyClass::Common, FrequencyClass::Moderate, FrequencyClass::Rare] {
            assert_eq!(FrequencyClass::parse(f.as_str()), Some(f));
        }
        assert_eq!(FrequencyClass::parse("nope"), None);
    }

    #[test]
    fn common_word_override_suppresses_match() {
        let gaz = NameGazetteer::new(
            [("rose".to_string(), FrequencyClass::Moderate)],
            ["rose".to_string()],
        );
        let found = gaz.detect("a single red rose bloomed");
        assert!(found.is_empty());
    }

    #[test]
    fn confidence_scales_with_frequency_class() {
        let gaz = NameGazetteer::default_gazetteer();
        let common = gaz.detect("James called");
        let rare = gaz.detect("Kiri called");
        assert!(rare[0].confidence > common[0].confidence);
    }

    #[test]
    fn case_insensitive_match() {
        let gaz = NameGazetteer::default_gazetteer();
        let found = gaz.detect("DAVE is here");
        assert_eq!(found.len(), 1);
    }
}
