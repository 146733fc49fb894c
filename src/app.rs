//! Process-wide shared state threaded through both HTTP surfaces (the proxy
//! mediator and the management server), mirroring oxicrab's pattern of a
//! single typed config/state struct passed as `Arc<AppState>` (or, for axum,
//! cloned `State<AppState>` since every field here is itself cheaply
//! cloneable — `Arc`, a lock-free snapshot handle, or a `reqwest::Client`).

use crate::config::{Config, ConfigSnapshot, LocalDb};
use crate::pipeline::PipelineHandle;
use crate::store::RehydrationStore;
use std::sync::Arc;
use std::time::Duration;

/// Default TTL applied to sessions created implicitly by the proxy mediator
/// when the caller doesn't pin one via `X-Anonamoose-Session` (spec.md §4.8).
/// Not specified by spec.md; chosen long enough to outlive a typical
/// streamed chat turn's round trip.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub settings: ConfigSnapshot,
    pub pipeline: PipelineHandle,
    pub store: Arc<dyn RehydrationStore>,
    pub db: Arc<LocalDb>,
    pub http: reqwest::Client,
}
