//! Regex detector: locale-filterable pattern set with
//! checksum validators and within-layer overlap resolution.

use super::checksums;
use super::{ClaimMask, Detection, DetectorKind, byte_to_char_offset, category_matches_locale, resolve_non_overlap};
use crate::config::Locale;
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

/// One pattern in the regex layer's enumerated set.
struct Pattern {
    category: &'static str,
    regex: &'static Regex,
    base_confidence: f32,
    /// Optional checksum validator; receives the matched text with any
    /// separator characters stripped. `None` if the category has no
    /// checksum (confidence is then fixed at `base_confidence`).
    validator: Option<fn(&str) -> bool>,
    /// Confidence applied when `validator` is present and passes.
    validated_confidence: f32,
}

fn strip_non_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn valid_ipv4_octets(s: &str) -> bool {
    s.split('.').all(|octet| octet.parse::<u16>().is_ok_and(|n| n <= 255))
}

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap());
static RE_CREDIT_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,18}\d\b").unwrap());
static RE_IPV4: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").unwrap());
static RE_IPV6: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:[0-9a-fA-F]{1,4}:){2,7}[0-9a-fA-F]{1,4}\b").unwrap());
static RE_MAC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5}\b").unwrap());
static RE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s<>\[\]{}|\\^`]+").unwrap());
static RE_VIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-HJ-NPR-Z0-9]{17}\b").unwrap());
static RE_DOB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").unwrap());
static RE_US_SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static RE_US_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\+1[ -]?)?\(?\d{3}\)?[ -]?\d{3}[ -]?\d{4}\b").unwrap());
static RE_UK_NHS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[ ]?\d{3}[ ]?\d{4}\b").unwrap());
static RE_UK_NINO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-CEGHJ-PR-TW-Z]{2}\d{6}[A-D]\b").unwrap());
static RE_UK_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\+44|0)\s?\d{2,4}[ -]?\d{3,4}[ -]?\d{3,4}\b").unwrap());
static RE_UK_POSTCODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[A-Z]{1,2}\d[A-Z\d]?\s?\d[A-Z]{2}\b").unwrap()
});
static RE_UK_PASSPORT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{9}\b").unwrap());
static RE_UK_SORT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}-\d{2}-\d{2}\b").unwrap());
static RE_AU_TFN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[ ]?\d{3}[ ]?\d{3}\b").unwrap());
static RE_AU_MEDICARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4}[ ]?\d{5}[ ]?\d\b").unwrap());
static RE_AU_ABN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}[ ]?\d{3}[ ]?\d{3}[ ]?\d{3}\b").unwrap());
static RE_AU_BSB_ACCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{3}\s+\d{6,10}\b").unwrap());
static RE_AU_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\+?61|0)[ ]?4\d{2}[ ]?\d{3}[ ]?\d{3}\b").unwrap());
static RE_AU_POSTCODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4}\b").unwrap());
static RE_AU_PASSPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-Z]\d{7}\b").unwrap());
static RE_NZ_IRD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2,3}[ -]?\d{3}[ -]?\d{3}\b").unwrap());
static RE_NZ_NHI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-Z]{3}\d{4}\b").unwrap());
static RE_NZ_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\+?64|0)[ ]?2\d[ ]?\d{3}[ ]?\d{3,4}\b").unwrap());
static RE_NZ_POSTCODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{4}\b").unwrap());
static RE_NZ_BANK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{2}-\d{4}-\d{7}-\d{2,3}\b").unwrap());
static RE_NZ_PASSPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-Z]{2}\d{6}\b").unwrap());
static RE_MRN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bMRN[:\s#-]*([A-Z0-9]{6,12})\b").unwrap());
static RE_LICENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:licen[cs]e|licence number|dl)[:\s#-]*([A-Z0-9]{5,12})\b").unwrap()
});

fn pattern_set() -> Vec<Pattern> {
    vec![
        Pattern { category: "EMAIL", regex: &RE_EMAIL, base_confidence: 0.95, validator: None, validated_confidence: 0.95 },
        Pattern { category: "CREDIT_CARD", regex: &RE_CREDIT_CARD, base_confidence: 0.70, validator: Some(|s| checksums::luhn(&strip_non_digits(s))), validated_confidence: 0.98 },
        Pattern { category: "IPV4", regex: &RE_IPV4, base_confidence: 0.70, validator: Some(valid_ipv4_octets), validated_confidence: 0.90 },
        Pattern { category: "IPV6", regex: &RE_IPV6, base_confidence: 0.85, validator: None, validated_confidence: 0.85 },
        Pattern { category: "MAC", regex: &RE_MAC, base_confidence: 0.90, validator: None, validated_confidence: 0.90 },
        Pattern { category: "URL", regex: &RE_URL, base_confidence: 0.90, validator: None, validated_confidence: 0.90 },
        Pattern { category: "VIN", regex: &RE_VIN, base_confidence: 0.70, validator: Some(checksums::vin), validated_confidence: 0.95 },
        Pattern { category: "DOB", regex: &RE_DOB, base_confidence: 0.70, validator: None, validated_confidence: 0.70 },
        Pattern { category: "US_SSN", regex: &RE_US_SSN, base_confidence: 0.90, validator: None, validated_confidence: 0.90 },
        Pattern { category: "US_PHONE", regex: &RE_US_PHONE, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
        Pattern { category: "UK_NHS", regex: &RE_UK_NHS, base_confidence: 0.70, validator: Some(|s| checksums::uk_nhs(&strip_non_digits(s))), validated_confidence: 0.97 },
        Pattern { category: "UK_NINO", regex: &RE_UK_NINO, base_confidence: 0.85, validator: None, validated_confidence: 0.85 },
        Pattern { category: "UK_PHONE", regex: &RE_UK_PHONE, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
        Pattern { category: "UK_POSTCODE", regex: &RE_UK_POSTCODE, base_confidence: 0.80, validator: None, validated_confidence: 0.80 },
        Pattern { category: "UK_PASSPORT", regex: &RE_UK_PASSPORT, base_confidence: 0.70, validator: None, validated_confidence: 0.70 },
        Pattern { category: "UK_SORT_CODE", regex: &RE_UK_SORT_CODE, base_confidence: 0.80, validator: None, validated_confidence: 0.80 },
        Pattern { category: "AU_TFN", regex: &RE_AU_TFN, base_confidence: 0.70, validator: Some(|s| checksums::au_tfn(&strip_non_digits(s))), validated_confidence: 0.97 },
        Pattern { category: "AU_MEDICARE", regex: &RE_AU_MEDICARE, base_confidence: 0.70, validator: Some(|s| checksums::au_medicare(&strip_non_digits(s))), validated_confidence: 0.97 },
        Pattern { category: "AU_ABN", regex: &RE_AU_ABN, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
        Pattern { category: "AU_BSB_ACCT", regex: &RE_AU_BSB_ACCT, base_confidence: 0.80, validator: None, validated_confidence: 0.80 },
        Pattern { category: "AU_PHONE", regex: &RE_AU_PHONE, base_confidence: 0.80, validator: None, validated_confidence: 0.80 },
        Pattern { category: "AU_POSTCODE", regex: &RE_AU_POSTCODE, base_confidence: 0.55, validator: None, validated_confidence: 0.55 },
        Pattern { category: "AU_PASSPORT", regex: &RE_AU_PASSPORT, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
        Pattern { category: "NZ_IRD", regex: &RE_NZ_IRD, base_confidence: 0.70, validator: Some(|s| checksums::nz_ird(&strip_non_digits(s))), validated_confidence: 0.97 },
        Pattern { category: "NZ_NHI", regex: &RE_NZ_NHI, base_confidence: 0.80, validator: None, validated_confidence: 0.80 },
        Pattern { category: "NZ_PHONE", regex: &RE_NZ_PHONE, base_confidence: 0.80, validator: None, validated_confidence: 0.80 },
        Pattern { category: "NZ_POSTCODE", regex: &RE_NZ_POSTCODE, base_confidence: 0.55, validator: None, validated_confidence: 0.55 },
        Pattern { category: "NZ_BANK", regex: &RE_NZ_BANK, base_confidence: 0.85, validator: None, validated_confidence: 0.85 },
        Pattern { category: "NZ_PASSPORT", regex: &RE_NZ_PASSPORT, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
        Pattern { category: "MRN", regex: &RE_MRN, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
        Pattern { category: "LICENCE_NUMBER", regex: &RE_LICENCE, base_confidence: 0.75, validator: None, validated_confidence: 0.75 },
    ]
}

/// Runs `validator` in a fault-isolated way: a panicking validator is caught
/// and treated as "no match", logged, and never aborts the pipeline
///.
fn run_validator(name: &str, validator: fn(&str) -> bool, text: &str) -> bool {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| validator(text))) {
        Ok(result) => result,
        Err(_) => {
            warn!(pattern = name, "regex validator panicked; treating as no match");
            false
        }
    }
}

pub fn detect(text: &str, locale: Option<Locale>) -> Vec<Detection> {
    let mut raw = Vec::new();
    for pattern in pattern_set() {
        if !category_matches_locale(pattern.category, locale) {
            continue;
        }
        for m in pattern.regex.find_iter(text) {
            let matched = m.as_str();
            let confidence = match pattern.validator {
                None => pattern.base_confidence,
                Some(validator) => {
                    if run_validator(pattern.category, validator, matched) {
                        pattern.validated_confidence
                    } else {
                        continue;
                    }
                }
            };
            let start = byte_to_char_offset(text, m.start());
            let end = byte_to_char_offset(text, m.end());
            raw.push(Detection::new(
                start,
                end,
                pattern.category,
                confidence,
                matched,
                DetectorKind::Regex,
            ));
        }
    }
    resolve_non_overlap(raw)
}

pub fn detect_masked(text: &str, locale: Option<Locale>, mask: &ClaimMask) -> Vec<Detection> {
    detect(text, locale)
        .into_iter()
        .filter(|d| !mask.is_claimed(d.start, d.end))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_email() {
        let found = detect("reach me at jane@example.com please", None);
        assert!(found.iter().any(|d| d.category == "EMAIL"));
    }

    #[test]
    fn credit_card_requires_luhn() {
        let valid = detect("4111 1111 1111 1111", None);
        assert!(valid.iter().any(|d| d.category == "CREDIT_CARD" && d.confidence > 0.9));

        let invalid = detect("4111 1111 1111 1112", None);
        assert!(!invalid.iter().any(|d| d.category == "CREDIT_CARD"));
    }

    #[test]
    fn ipv4_checksum_rejects_bad_octet() {
        let valid = detect("connect to 192.168.1.1 now", None);
        assert!(valid.iter().any(|d| d.category == "IPV4"));
        let invalid = detect("connect to 999.168.1.1 now", None);
        assert!(!invalid.iter().any(|d| d.category == "IPV4" && d.confidence > 0.8));
    }

    #[test]
    fn locale_filter_excludes_foreign_region() {
        let found = detect("IRD 49091850 and NHS 9434765919", Some(Locale::Nz));
        assert!(found.iter().all(|d| !d.category.starts_with("UK_")));
    }

    #[test]
    fn locale_none_allows_all_regions() {
        let found = detect("email someone@example.com", None);
        assert!(!found.is_empty());
    }
}
