//! The management HTTP surface (SPEC_FULL.md §9.5): an unauthenticated
//! liveness probe, bearer-gated storage stats, and a bearer-gated settings
//! hot-reload endpoint. Runs on its own port (`MGMT_PORT`) so it can be
//! firewalled off from the proxy port independently.
//!
//! Dictionary/session CRUD stay out of this surface by design (spec.md §1
//! lists admin REST CRUD as an external collaborator's concern) — operators
//! edit the local database file directly.

use crate::app::AppState;
use crate::config::{DictionaryEntry, Settings};
use crate::errors::AnonamooseError;
use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mgmt/healthz", get(healthz))
        .route("/mgmt/stats", get(stats))
        .route("/mgmt/settings", post(apply_settings))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: crate::VERSION })
}

async fn stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<crate::store::StorageStats>, AnonamooseError> {
    authorize(&headers, state.config.stats_token.as_deref().or(state.config.api_token.as_deref()))?;
    let stats = state.store.storage_stats().await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsRequest {
    settings: Settings,
    #[serde(default)]
    dictionary: Option<Vec<DictionaryEntry>>,
}

/// Republishes a new `Settings` snapshot (visible to every in-flight and
/// future request immediately) and, if a dictionary list is supplied,
/// rebuilds the pipeline's dictionary matcher. Both are persisted to the
/// local database so they survive a restart.
async fn apply_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SettingsRequest>,
) -> Result<Json<Settings>, AnonamooseError> {
    authorize(&headers, state.config.api_token.as_deref())?;

    state.db.save_settings(&req.settings).map_err(AnonamooseError::Internal)?;
    state.settings.publish(req.settings.clone());

    if let Some(entries) = req.dictionary {
        for entry in &entries {
            state.db.upsert_dictionary_entry(entry).map_err(AnonamooseError::Internal)?;
        }
        let all_entries = state.db.load_dictionary().map_err(AnonamooseError::Internal)?;
        state.pipeline.current().rebuild_dictionary(&all_entries);
    }

    Ok(Json(req.settings))
}

fn authorize(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AnonamooseError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match provided {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => Err(AnonamooseError::Unauthorized),
    }
}
