// Shared test harness — not every helper is used by every test binary.
#![allow(dead_code)]

use anonamoose::app::AppState;
use anonamoose::config::{Config, ConfigSnapshot, LocalDb, Settings};
use anonamoose::pipeline::{Pipeline, PipelineHandle};
use anonamoose::store::RehydrationStore;
use anonamoose::store::local::LocalStore;
use std::sync::Arc;

/// Builds an `AppState` wired to a local in-memory DB, a fresh in-process
/// store, and `upstream_base_url` pointed at a `wiremock::MockServer` so the
/// proxy mediator's outbound call lands on the double instead of a real
/// upstream API.
pub fn test_state(upstream_base_url: String) -> AppState {
    let db = LocalDb::open_in_memory().expect("in-memory db");
    let settings = ConfigSnapshot::new(Settings::default());
    let pipeline = PipelineHandle::new(Pipeline::new(&[], &[]));
    let store: Arc<dyn RehydrationStore> = Arc::new(LocalStore::new());

    AppState {
        config: Arc::new(Config {
            port: 0,
            mgmt_port: 0,
            db_path: std::path::PathBuf::new(),
            api_token: None,
            stats_token: None,
            redis_url: None,
            ner_model_cache: std::path::PathBuf::new(),
            upstream_base_url,
        }),
        settings,
        pipeline,
        store,
        db: Arc::new(db),
        http: reqwest::Client::new(),
    }
}
