pub mod persist;
pub mod settings;

pub use persist::LocalDb;
pub use settings::{ConfigSnapshot, DictionaryEntry, Locale, Settings};

use std::path::PathBuf;

/// Process-wide configuration, read once at boot from the environment
/// (mirrors oxicrab's single typed config struct threaded through as
/// `Arc<Config>`).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub mgmt_port: u16,
    pub db_path: PathBuf,
    pub api_token: Option<String>,
    pub stats_token: Option<String>,
    pub redis_url: Option<String>,
    pub ner_model_cache: PathBuf,
    pub upstream_base_url: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);
        let mgmt_port = std::env::var("MGMT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3001);
        let db_path = std::env::var("ANONAMOOSE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_db_path());
        let api_token = std::env::var("API_TOKEN").ok();
        let stats_token = std::env::var("STATS_TOKEN").ok();
        let redis_url = std::env::var("REDIS_URL").ok();
        let ner_model_cache = std::env::var("NER_MODEL_CACHE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_dir());
        let upstream_base_url = std::env::var("UPSTREAM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());

        Ok(Self {
            port,
            mgmt_port,
            db_path,
            api_token,
            stats_token,
            redis_url,
            ner_model_cache,
            upstream_base_url,
        })
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anonamoose")
        .join("anonamoose.db")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("anonamoose")
        .join("models")
}
