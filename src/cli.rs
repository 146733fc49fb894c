//! Command-line entry point. `anonamoose` with no subcommand starts the
//! proxy and management servers; `anonamoose dictionary import <file>` and
//! `anonamoose names import <file>` are one-shot operator utilities for
//! seeding the local dictionary and name-gazetteer tables (neither has an
//! HTTP CRUD surface by design — see spec.md §1).

use crate::app::AppState;
use crate::config::{Config, ConfigSnapshot, DictionaryEntry, LocalDb};
use crate::detect::names::NameEntry;
use crate::pipeline::{Pipeline, PipelineHandle};
use crate::store::RehydrationStore;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "anonamoose", version, about = "Transparent PII-redacting gateway for LLM chat/completion APIs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the proxy and management servers (the default with no subcommand).
    Serve,
    /// Dictionary maintenance utilities.
    #[command(subcommand)]
    Dictionary(DictionaryCommand),
    /// Name gazetteer maintenance utilities.
    #[command(subcommand)]
    Names(NamesCommand),
}

#[derive(Subcommand)]
enum DictionaryCommand {
    /// Load a JSON array of `{term, category, caseSensitive}` entries into the local dictionary table.
    Import {
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum NamesCommand {
    /// Load a JSON array of `{name, frequency}` entries (`frequency` one of
    /// `common`/`moderate`/`rare`) into the local name gazetteer table,
    /// replacing the embedded ~10-entry placeholder list.
    Import {
        path: PathBuf,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Dictionary(DictionaryCommand::Import { path }) => import_dictionary(&path).await,
        Command::Names(NamesCommand::Import { path }) => import_names(&path).await,
    }
}

async fn import_dictionary(path: &PathBuf) -> Result<()> {
    let config = Config::from_env()?;
    let db = LocalDb::open(&config.db_path)?;
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let entries: Vec<DictionaryEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing dictionary entries from {}", path.display()))?;
    let count = entries.len();
    for entry in &entries {
        db.upsert_dictionary_entry(entry)?;
    }
    info!(count, path = %path.display(), "imported dictionary entries");
    Ok(())
}

async fn import_names(path: &PathBuf) -> Result<()> {
    let config = Config::from_env()?;
    let db = LocalDb::open(&config.db_path)?;
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let entries: Vec<NameEntry> =
        serde_json::from_str(&raw).with_context(|| format!("parsing name entries from {}", path.display()))?;
    let count = entries.len();
    for entry in &entries {
        db.upsert_name_entry(entry)?;
    }
    info!(count, path = %path.display(), "imported name gazetteer entries");
    Ok(())
}

async fn serve() -> Result<()> {
    let config = Config::from_env()?;
    std::fs::create_dir_all(&config.ner_model_cache).ok();

    let db = LocalDb::open(&config.db_path)?;
    let settings = db.load_settings()?;
    let dictionary_entries = db.load_dictionary()?;
    let name_entries = db.load_names()?;

    let settings = ConfigSnapshot::new(settings);

    let mut pipeline = Pipeline::new(&dictionary_entries, &name_entries);
    #[cfg(feature = "ner")]
    {
        pipeline = pipeline.with_ner(build_ner_detector(&config));
    }
    let pipeline = PipelineHandle::new(pipeline);

    let (store, local_for_sweep) = build_store(&config).await;

    let state = AppState {
        config: Arc::new(config.clone()),
        settings,
        pipeline,
        store,
        db: Arc::new(db),
        http: reqwest::Client::builder().build().context("building upstream HTTP client")?,
    };

    if let Some(local) = local_for_sweep {
        tokio::spawn(crate::store::local::run_expiry_sweep_loop(local, Duration::from_secs(60)));
    }

    let proxy_router = crate::proxy::router(state.clone());
    let mgmt_router = crate::mgmt::router(state.clone());

    let proxy_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding proxy port {}", config.port))?;
    let mgmt_listener = tokio::net::TcpListener::bind(("0.0.0.0", config.mgmt_port))
        .await
        .with_context(|| format!("binding management port {}", config.mgmt_port))?;

    info!(port = config.port, mgmt_port = config.mgmt_port, "anonamoose listening");

    let proxy_server = axum::serve(proxy_listener, proxy_router);
    let mgmt_server = axum::serve(mgmt_listener, mgmt_router);

    tokio::select! {
        result = proxy_server => result.context("proxy server exited")?,
        result = mgmt_server => result.context("management server exited")?,
        _ = tokio::signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    Ok(())
}

/// Standard CoNLL-03 BIO label set the bundled NER model is trained against
/// (spec.md §4.5's `nerModel` setting names the model file; the label
/// mapping itself is fixed by the model's training, not operator-configurable).
#[cfg(feature = "ner")]
const NER_LABELS: &[&str] =
    &["O", "B-PER", "I-PER", "B-ORG", "I-ORG", "B-LOC", "I-LOC", "B-MISC", "I-MISC"];

#[cfg(feature = "ner")]
fn build_ner_detector(config: &Config) -> crate::detect::ner::NerDetector {
    let model_path = config.ner_model_cache.join("model.onnx");
    let tokenizer_path = config.ner_model_cache.join("tokenizer.json");
    let id_to_label: Vec<String> = NER_LABELS.iter().map(|s| s.to_string()).collect();
    crate::detect::ner::NerDetector::new(move || {
        crate::detect::ner::ort_backend::OrtNerBackend::load(&model_path, &tokenizer_path, id_to_label.clone())
            .map(|backend| Arc::new(backend) as Arc<dyn crate::detect::ner::NerBackend>)
    })
}

/// Attempts the Redis-backed store first (spec.md §4.7 "gracefully fall
/// back to local if initial connection fails: log once, continue"). Returns
/// the concrete `LocalStore` handle too, when that's the backend in use, so
/// the caller can spawn its periodic expiry sweep.
async fn build_store(
    config: &Config,
) -> (Arc<dyn RehydrationStore>, Option<Arc<crate::store::local::LocalStore>>) {
    if let Some(redis_url) = &config.redis_url {
        match crate::store::remote::RemoteStore::connect(redis_url).await {
            Ok(store) => return (Arc::new(store), None),
            Err(e) => warn!(error = %e, "remote store unreachable at boot, falling back to local"),
        }
    }
    let local = Arc::new(crate::store::local::LocalStore::new());
    (local.clone(), Some(local))
}
