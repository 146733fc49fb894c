use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Opening/closing Private Use Area sentinels that delimit a minted token.
/// See [`crate::tokenizer`].
pub const DEFAULT_SENTINEL_OPEN: char = '\u{E000}';
pub const DEFAULT_SENTINEL_CLOSE: char = '\u{E001}';

/// Regional pattern-set filter for the regex layer (§4.3 locale filtering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Locale {
    Au,
    Nz,
    Uk,
    Us,
}

impl Locale {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "AU" => Some(Self::Au),
            "NZ" => Some(Self::Nz),
            "UK" => Some(Self::Uk),
            "US" => Some(Self::Us),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Au => "AU",
            Self::Nz => "NZ",
            Self::Uk => "UK",
            Self::Us => "US",
        }
    }
}

/// The mapping from well-known keys to JSON-typed values described in
/// spec.md §3 "Settings", with the listed defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enable_dictionary: bool,
    #[serde(default = "default_true")]
    pub enable_regex: bool,
    #[serde(default = "default_true")]
    pub enable_names: bool,
    #[serde(default = "default_true")]
    pub enable_ner: bool,
    #[serde(default = "default_ner_model")]
    pub ner_model: String,
    #[serde(default = "default_ner_min_confidence")]
    pub ner_min_confidence: f32,
    #[serde(default = "default_true")]
    pub tokenize_placeholders: bool,
    #[serde(default = "default_sentinel_open")]
    pub placeholder_prefix: char,
    #[serde(default = "default_sentinel_close")]
    pub placeholder_suffix: char,
    #[serde(default)]
    pub locale: Option<Locale>,
}

fn default_true() -> bool {
    true
}
fn default_ner_model() -> String {
    "dslim/bert-base-NER".to_string()
}
fn default_ner_min_confidence() -> f32 {
    0.6
}
fn default_sentinel_open() -> char {
    DEFAULT_SENTINEL_OPEN
}
fn default_sentinel_close() -> char {
    DEFAULT_SENTINEL_CLOSE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_dictionary: true,
            enable_regex: true,
            enable_names: true,
            enable_ner: true,
            ner_model: default_ner_model(),
            ner_min_confidence: default_ner_min_confidence(),
            tokenize_placeholders: true,
            placeholder_prefix: DEFAULT_SENTINEL_OPEN,
            placeholder_suffix: DEFAULT_SENTINEL_CLOSE,
            locale: None,
        }
    }
}

impl Settings {
    /// Build from a flat `key -> JSON value` map, as read from the local
    /// `settings` table, falling back to defaults for absent/unparsable keys.
    pub fn from_map(map: &HashMap<String, Value>) -> Self {
        let mut settings = Self::default();
        if let Some(v) = map.get("enableDictionary").and_then(Value::as_bool) {
            settings.enable_dictionary = v;
        }
        if let Some(v) = map.get("enableRegex").and_then(Value::as_bool) {
            settings.enable_regex = v;
        }
        if let Some(v) = map.get("enableNames").and_then(Value::as_bool) {
            settings.enable_names = v;
        }
        if let Some(v) = map.get("enableNER").and_then(Value::as_bool) {
            settings.enable_ner = v;
        }
        if let Some(v) = map.get("nerModel").and_then(Value::as_str) {
            settings.ner_model = v.to_string();
        }
        if let Some(v) = map.get("nerMinConfidence").and_then(Value::as_f64) {
            settings.ner_min_confidence = v as f32;
        }
        if let Some(v) = map.get("tokenizePlaceholders").and_then(Value::as_bool) {
            settings.tokenize_placeholders = v;
        }
        if let Some(v) = map
            .get("locale")
            .and_then(Value::as_str)
            .and_then(Locale::parse)
        {
            settings.locale = Some(v);
        }
        settings
    }

    pub fn to_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert(
            "enableDictionary".to_string(),
            Value::Bool(self.enable_dictionary),
        );
        map.insert("enableRegex".to_string(), Value::Bool(self.enable_regex));
        map.insert("enableNames".to_string(), Value::Bool(self.enable_names));
        map.insert("enableNER".to_string(), Value::Bool(self.enable_ner));
        map.insert(
            "nerModel".to_string(),
            Value::String(self.ner_model.clone()),
        );
        map.insert(
            "nerMinConfidence".to_string(),
            serde_json::json!(self.ner_min_confidence),
        );
        map.insert(
            "tokenizePlaceholders".to_string(),
            Value::Bool(self.tokenize_placeholders),
        );
        if let Some(locale) = self.locale {
            map.insert(
                "locale".to_string(),
                Value::String(locale.as_str().to_string()),
            );
        }
        map
    }
}

/// An operator-managed term to be redacted unconditionally by the
/// dictionary layer (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub term: String,
    pub category: String,
    pub case_sensitive: bool,
}

/// Holds the process-wide, read-mostly `Settings` snapshot described in
/// spec.md §9 "Dynamic configuration without restart": detectors read the
/// pointer once at layer entry via [`ConfigSnapshot::current`]; a config
/// change publishes a brand new `Arc<Settings>` rather than mutating fields
/// under a lock readers would otherwise contend on.
#[derive(Clone)]
pub struct ConfigSnapshot {
    inner: Arc<RwLock<Arc<Settings>>>,
}

impl ConfigSnapshot {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    pub fn current(&self) -> Arc<Settings> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    pub fn publish(&self, settings: Settings) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Arc::new(settings);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let s = Settings::default();
        assert!(s.enable_dictionary && s.enable_regex && s.enable_names && s.enable_ner);
        assert_eq!(s.ner_min_confidence, 0.6);
        assert!(s.tokenize_placeholders);
        assert_eq!(s.placeholder_prefix, DEFAULT_SENTINEL_OPEN);
        assert_eq!(s.placeholder_suffix, DEFAULT_SENTINEL_CLOSE);
        assert!(s.locale.is_none());
    }

    #[test]
    fn from_map_overrides_defaults() {
        let mut map = HashMap::new();
        map.insert("enableNER".to_string(), Value::Bool(false));
        map.insert("locale".to_string(), Value::String("nz".to_string()));
        let settings = Settings::from_map(&map);
        assert!(!settings.enable_ner);
        assert_eq!(settings.locale, Some(Locale::Nz));
        // untouched keys keep their defaults
        assert!(settings.enable_regex);
    }

    #[test]
    fn snapshot_publish_is_visible_to_existing_handles() {
        let snap = ConfigSnapshot::new(Settings::default());
        let other = snap.clone();
        let mut changed = Settings::default();
        changed.enable_names = false;
        snap.publish(changed);
        assert!(!other.current().enable_names);
    }

    #[test]
    fn locale_parse_roundtrip() {
        for l in [Locale::Au, Locale::Nz, Locale::Uk, Locale::Us] {
            assert_eq!(Locale::parse(l.as_str()), Some(l));
        }
        assert_eq!(Locale::parse("xx"), None);
    }
}
