use crate::config::settings::{DictionaryEntry, Settings};
use crate::detect::names::{FrequencyClass, NameEntry};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

/// Local relational persistence for settings, the dictionary, and the name
/// gazetteer: `settings(key TEXT PK, value JSON, updated_at TIMESTAMP)`,
/// `dictionary(term TEXT, category TEXT, case_sensitive BOOL)`,
/// `names(name TEXT PK, frequency TEXT)`.
///
/// Sessions are deliberately not stored here — they live in the rehydration
/// store (local in-memory or remote), which is not required to survive a
/// restart.
pub struct LocalDb {
    conn: Connection,
}

impl LocalDb {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", path.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening anonamoose db at {}", path.display()))?;
        Self::migrate(&conn)?;
        info!(path = %path.display(), "opened local settings/dictionary db");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS dictionary (
                term TEXT NOT NULL,
                category TEXT NOT NULL,
                case_sensitive INTEGER NOT NULL,
                UNIQUE(term, case_sensitive)
            );
            CREATE TABLE IF NOT EXISTS names (
                name TEXT PRIMARY KEY,
                frequency TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Settings> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM settings")?;
        let mut map = std::collections::HashMap::new();
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            Ok((key, value))
        })?;
        for row in rows {
            let (key, value) = row?;
            if let Ok(parsed) = serde_json::from_str(&value) {
                map.insert(key, parsed);
            }
        }
        Ok(Settings::from_map(&map))
    }

    pub fn save_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, serde_json::to_string(value)?, now],
        )?;
        Ok(())
    }

    pub fn save_settings(&self, settings: &Settings) -> Result<()> {
        for (key, value) in settings.to_map() {
            self.save_setting(&key, &value)?;
        }
        Ok(())
    }

    pub fn load_dictionary(&self) -> Result<Vec<DictionaryEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT term, category, case_sensitive FROM dictionary")?;
        let rows = stmt.query_map([], |row| {
            Ok(DictionaryEntry {
                term: row.get(0)?,
                category: row.get(1)?,
                case_sensitive: row.get::<_, i64>(2)? != 0,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Insert or replace an entry; term uniqueness is case-folded when
    /// `case_sensitive = false` so re-adding "Acme" and "ACME" collapses to
    /// a single row.
    pub fn upsert_dictionary_entry(&self, entry: &DictionaryEntry) -> Result<()> {
        let key_term = if entry.case_sensitive {
            entry.term.clone()
        } else {
            entry.term.to_lowercase()
        };
        self.conn.execute(
            "DELETE FROM dictionary WHERE (case_sensitive = 0 AND lower(term) = ?1)
                OR (case_sensitive = 1 AND term = ?2)",
            rusqlite::params![key_term, entry.term],
        )?;
        self.conn.execute(
            "INSERT INTO dictionary (term, category, case_sensitive) VALUES (?1, ?2, ?3)",
            rusqlite::params![entry.term, entry.category, entry.case_sensitive as i64],
        )?;
        Ok(())
    }

    /// Loads the operator-imported name gazetteer, mirroring
    /// [`Self::load_dictionary`]. Empty until `anonamoose names import` has
    /// been run at least once.
    pub fn load_names(&self) -> Result<Vec<NameEntry>> {
        let mut stmt = self.conn.prepare("SELECT name, frequency FROM names")?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let frequency: String = row.get(1)?;
            Ok((name, frequency))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (name, frequency) = row?;
            let Some(frequency) = FrequencyClass::parse(&frequency) else {
                continue;
            };
            entries.push(NameEntry { name, frequency });
        }
        Ok(entries)
    }

    /// Insert or replace a gazetteer entry, case-folded so re-importing the
    /// same name under different casing collapses to one row.
    pub fn upsert_name_entry(&self, entry: &NameEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO names (name, frequency) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET frequency = excluded.frequency",
            rusqlite::params![entry.name.to_lowercase(), entry.frequency.as_str()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip() {
        let db = LocalDb::open_in_memory().unwrap();
        let mut settings = Settings::default();
        settings.enable_ner = false;
        settings.ner_min_confidence = 0.8;
        db.save_settings(&settings).unwrap();

        let loaded = db.load_settings().unwrap();
        assert!(!loaded.enable_ner);
        assert_eq!(loaded.ner_min_confidence, 0.8);
    }

    #[test]
    fn dictionary_case_insensitive_dedup() {
        let db = LocalDb::open_in_memory().unwrap();
        db.upsert_dictionary_entry(&DictionaryEntry {
            term: "Acme".to_string(),
            category: "ORG".to_string(),
            case_sensitive: false,
        })
        .unwrap();
        db.upsert_dictionary_entry(&DictionaryEntry {
            term: "ACME".to_string(),
            category: "ORG".to_string(),
            case_sensitive: false,
        })
        .unwrap();
        let entries = db.load_dictionary().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].term, "ACME");
    }

    #[test]
    fn names_roundtrip_and_dedup_case_insensitive() {
        let db = LocalDb::open_in_memory().unwrap();
        assert!(db.load_names().unwrap().is_empty());
        db.upsert_name_entry(&NameEntry { name: "Zolastra".to_string(), frequency: FrequencyClass::Rare })
            .unwrap();
        db.upsert_name_entry(&NameEntry { name: "zolastra".to_string(), frequency: FrequencyClass::Common })
            .unwrap();
        let entries = db.load_names().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].frequency, FrequencyClass::Common);
    }

    #[test]
    fn dictionary_case_sensitive_keeps_both() {
        let db = LocalDb::open_in_memory().unwrap();
        db.upsert_dictionary_entry(&DictionaryEntry {
            term: "Reed".to_string(),
            category: "PERSON".to_string(),
            case_sensitive: true,
        })
        .unwrap();
        db.upsert_dictionary_entry(&DictionaryEntry {
            term: "reed".to_string(),
            category: "PERSON".to_string(),
            case_sensitive: true,
        })
        .unwrap();
        let entries = db.load_dictionary().unwrap();
        assert_eq!(entries.len(), 2);
    }
}
