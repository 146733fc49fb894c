//! The proxy mediator (spec.md §4.8): intercepts chat/completion-style
//! requests, runs the redaction pipeline over role-scoped text fields,
//! forwards the sanitized body upstream with the caller's own auth headers,
//! and rehydrates the response on the way back — including token
//! occurrences split across SSE chunk boundaries.
//!
//! Route wiring and the axum `serve` bootstrap mirror oxicrab's
//! `gateway::start`; the handlers themselves are new.

pub mod dialect;
pub mod frame;
pub mod sse;

use crate::app::{AppState, DEFAULT_SESSION_TTL};
use crate::config::settings::{DEFAULT_SENTINEL_CLOSE, DEFAULT_SENTINEL_OPEN};
use crate::config::{ConfigSnapshot, Locale, Settings};
use crate::errors::AnonamooseError;
use crate::pipeline::Pipeline;
use crate::store::{self, RehydrationStore, Session, TokenBinding};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use dialect::Dialect;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sse::StreamRehydrator;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/chat/completions", post(chat_completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/messages", post(messages))
        .route("/v1/models", get(models))
        .route("/api/v1/redact", post(direct_redact))
        .route("/api/v1/hydrate", post(direct_hydrate))
        .with_state(state)
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AnonamooseError> {
    mediate(state, Dialect::ChatCompletions, "/v1/chat/completions", headers, body).await
}

async fn embeddings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AnonamooseError> {
    mediate(state, Dialect::Embeddings, "/v1/embeddings", headers, body).await
}

async fn messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, AnonamooseError> {
    mediate(state, Dialect::Messages, "/v1/messages", headers, body).await
}

/// `GET /v1/models` carries no redactable body; forwarded verbatim.
async fn models(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AnonamooseError> {
    let url = format!("{}/v1/models", state.config.upstream_base_url);
    let mut req = state.http.get(&url);
    if let Some(auth) = header_str(&headers, "authorization") {
        req = req.header("authorization", auth);
    }
    let resp = req.send().await.map_err(upstream_transport_error)?;
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(upstream_transport_error)?;
    if !status.is_success() {
        return Err(AnonamooseError::UpstreamError {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    Ok(([(CONTENT_TYPE, "application/json")], bytes).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedactRequest {
    text: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    locale: Option<String>,
    #[serde(default)]
    layers: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct BindingSummary {
    token: String,
    category: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RedactResponse {
    sanitized: String,
    session_id: String,
    bindings: Vec<BindingSummary>,
}

/// `POST /api/v1/redact` — the pipeline as a standalone HTTP surface,
/// bypassing the upstream-forwarding path entirely (spec.md §6).
async fn direct_redact(
    State(state): State<AppState>,
    Json(req): Json<RedactRequest>,
) -> Result<Json<RedactResponse>, AnonamooseError> {
    let session_id = match &req.session_id {
        Some(raw) => store::parse_session_id(raw)
            .map(|id| id.to_string())
            .ok_or_else(|| AnonamooseError::InvalidSessionId(raw.clone()))?,
        None => Uuid::new_v4().to_string(),
    };

    let base = state.settings.current();
    let settings = ConfigSnapshot::new(apply_overrides(&base, req.locale.as_deref(), req.layers.as_deref()));
    let existing = state
        .store
        .retrieve(&session_id)
        .await?
        .map(|s| s.bindings)
        .unwrap_or_default();

    let pipeline = state.pipeline.current();
    let result = pipeline.redact(&req.text, &settings, &existing).await;
    if !result.bindings.is_empty() {
        state.store.store(&session_id, result.bindings.clone(), DEFAULT_SESSION_TTL).await?;
    }

    let bindings = result
        .bindings
        .into_iter()
        .map(|b| BindingSummary { token: b.token, category: b.category })
        .collect();
    Ok(Json(RedactResponse { sanitized: result.sanitized, session_id, bindings }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HydrateRequest {
    text: String,
    session_id: String,
}

#[derive(Debug, Serialize)]
struct HydrateResponse {
    text: String,
}

/// `POST /api/v1/hydrate` — direct access to `RehydrationStore::hydrate`.
async fn direct_hydrate(
    State(state): State<AppState>,
    Json(req): Json<HydrateRequest>,
) -> Result<Json<HydrateResponse>, AnonamooseError> {
    let text = state.store.hydrate(&req.text, &req.session_id).await?;
    Ok(Json(HydrateResponse { text }))
}

/// Shared body for every upstream-forwarding route: resolve the session and
/// per-call overrides, redact request fields, forward, rehydrate or stream
/// the response back.
async fn mediate(
    state: AppState,
    dialect: Dialect,
    upstream_path: &'static str,
    headers: HeaderMap,
    mut body: Value,
) -> Result<Response, AnonamooseError> {
    let session_id = resolve_session_id(&headers)?;
    let redact_enabled = toggle_enabled(&headers, "x-anonamoose-redact");
    let hydrate_enabled = toggle_enabled(&headers, "x-anonamoose-hydrate");
    let settings = resolve_settings(&state, &headers);

    if redact_enabled {
        let existing = state
            .store
            .retrieve(&session_id)
            .await?
            .map(|s| s.bindings)
            .unwrap_or_default();
        let pipeline = state.pipeline.current();
        let minted = redact_body_fields(&pipeline, &settings, dialect, &mut body, &existing).await;
        if !minted.is_empty() {
            state.store.store(&session_id, minted, DEFAULT_SESSION_TTL).await?;
        }
    }

    let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let url = format!("{}{}", state.config.upstream_base_url, upstream_path);
    let mut req = state.http.post(&url).json(&body);
    if let Some(auth) = header_str(&headers, "authorization") {
        req = req.header("authorization", auth);
    }

    let resp = req.send().await.map_err(upstream_transport_error)?;
    let status = resp.status();

    if streaming && status.is_success() {
        let session = if hydrate_enabled { state.store.retrieve(&session_id).await? } else { None };
        return Ok(build_stream_response(resp, dialect, session));
    }

    let response_bytes = resp.bytes().await.map_err(upstream_transport_error)?;
    if !status.is_success() {
        return Err(AnonamooseError::UpstreamError {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&response_bytes).into_owned(),
        });
    }

    let mut response_body: Value = serde_json::from_slice(&response_bytes)
        .map_err(|e| AnonamooseError::BadRequest(format!("upstream returned non-JSON body: {e}")))?;

    if hydrate_enabled {
        rehydrate_body_fields(&state.store, dialect, &mut response_body, &session_id).await?;
    }

    Ok(Json(response_body).into_response())
}

fn upstream_transport_error(e: reqwest::Error) -> AnonamooseError {
    AnonamooseError::UpstreamError { status: 502, body: e.to_string() }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `on`/absent -> enabled; anything matching `off`/`false`/`0` -> disabled.
fn toggle_enabled(headers: &HeaderMap, name: &str) -> bool {
    match header_str(headers, name) {
        Some(v) => !matches!(v.to_ascii_lowercase().as_str(), "off" | "false" | "0"),
        None => true,
    }
}

fn resolve_session_id(headers: &HeaderMap) -> Result<String, AnonamooseError> {
    match header_str(headers, "x-anonamoose-session") {
        Some(raw) => store::parse_session_id(raw)
            .map(|id| id.to_string())
            .ok_or_else(|| AnonamooseError::InvalidSessionId(raw.to_string())),
        None => Ok(Uuid::new_v4().to_string()),
    }
}

fn resolve_settings(state: &AppState, headers: &HeaderMap) -> ConfigSnapshot {
    match header_str(headers, "x-anonamoose-locale") {
        Some(locale) => {
            let base = state.settings.current();
            ConfigSnapshot::new(apply_overrides(&base, Some(locale), None))
        }
        None => state.settings.clone(),
    }
}

/// Builds a one-off `Settings` value with the per-call `locale`/`layers`
/// overrides applied, leaving the process-wide snapshot untouched.
fn apply_overrides(base: &Settings, locale: Option<&str>, layers: Option<&[String]>) -> Settings {
    let mut settings = base.clone();
    if let Some(locale) = locale.and_then(Locale::parse) {
        settings.locale = Some(locale);
    }
    if let Some(layers) = layers {
        let enabled: std::collections::HashSet<String> =
            layers.iter().map(|l| l.to_ascii_lowercase()).collect();
        settings.enable_dictionary = enabled.contains("dictionary");
        settings.enable_regex = enabled.contains("regex");
        settings.enable_names = enabled.contains("names");
        settings.enable_ner = enabled.contains("ner");
    }
    settings
}

/// Walks the request body's dialect-specific text fields, redacts each
/// in-place, and returns only the bindings newly minted this call (already-
/// bound originals are reused via `existing_bindings` but not re-returned).
async fn redact_body_fields(
    pipeline: &Pipeline,
    settings: &ConfigSnapshot,
    dialect: Dialect,
    body: &mut Value,
    existing_bindings: &[TokenBinding],
) -> Vec<TokenBinding> {
    let pointers = dialect::request_pointers(dialect, body);
    let mut accumulated: Vec<TokenBinding> = existing_bindings.to_vec();
    let mut minted: Vec<TokenBinding> = Vec::new();

    for pointer in pointers {
        let Some(text) = body.pointer(&pointer).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let result = pipeline.redact(&text, settings, &accumulated).await;
        if let Some(slot) = body.pointer_mut(&pointer) {
            *slot = Value::String(result.sanitized);
        }
        for binding in result.bindings {
            accumulated.push(binding.clone());
            minted.push(binding);
        }
    }
    minted
}

async fn rehydrate_body_fields(
    store: &Arc<dyn RehydrationStore>,
    dialect: Dialect,
    body: &mut Value,
    session_id: &str,
) -> Result<(), AnonamooseError> {
    let pointers = dialect::response_pointers(dialect, &*body);
    for pointer in pointers {
        let Some(text) = body.pointer(&pointer).and_then(Value::as_str).map(str::to_string) else {
            continue;
        };
        let hydrated = store.hydrate(&text, session_id).await?;
        if let Some(slot) = body.pointer_mut(&pointer) {
            *slot = Value::String(hydrated);
        }
    }
    Ok(())
}

/// State threaded through the SSE re-emission loop: the upstream response
/// being drained, the raw-byte reassembly buffer, the per-stream token
/// rehydrator, and a queue of already-rendered frames awaiting delivery to
/// the client (one upstream chunk may yield more than one complete event).
struct StreamCtx {
    resp: reqwest::Response,
    buf: String,
    dialect: Dialect,
    rehydrator: StreamRehydrator,
    /// The most recent content-delta event, kept so a non-empty `flush()`
    /// leftover at stream end has somewhere to go: a synthetic final frame
    /// shaped like the last real one, with just the leftover text.
    last_template: Option<(Option<String>, Value, String)>,
    pending: VecDeque<Bytes>,
    finished: bool,
}

fn build_stream_response(resp: reqwest::Response, dialect: Dialect, session: Option<Session>) -> Response {
    let rehydrator = StreamRehydrator::new(session, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE);
    let ctx = StreamCtx {
        resp,
        buf: String::new(),
        dialect,
        rehydrator,
        last_template: None,
        pending: VecDeque::new(),
        finished: false,
    };
    let stream = futures_util::stream::unfold(ctx, step_stream);
    let body = Body::from_stream(stream);
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Single step of the re-emission loop. Drains queued frames first; once
/// empty, reads another upstream chunk, reassembles complete SSE events out
/// of the accumulated buffer (mirroring `providers::anthropic`'s
/// accumulate-then-`rfind("\n\n")`-truncate pattern), rehydrates any
/// content-delta text, and queues the rendered frames for delivery.
async fn step_stream(mut ctx: StreamCtx) -> Option<(Result<Bytes, std::io::Error>, StreamCtx)> {
    if let Some(frame) = ctx.pending.pop_front() {
        return Some((Ok(frame), ctx));
    }
    if ctx.finished {
        return None;
    }

    loop {
        match ctx.resp.chunk().await {
            Ok(Some(bytes)) => {
                ctx.buf.push_str(&String::from_utf8_lossy(&bytes));
                let events = frame::parse_sse_chunk(&ctx.buf);
                if let Some(idx) = ctx.buf.rfind("\n\n") {
                    ctx.buf = ctx.buf[idx + 2..].to_string();
                }
                for event in events {
                    push_event(&mut ctx, event);
                }
                if let Some(frame) = ctx.pending.pop_front() {
                    return Some((Ok(frame), ctx));
                }
            }
            Ok(None) => {
                let leftover = ctx.rehydrator.flush();
                if !leftover.is_empty() {
                    if let Some((event_type, mut template, pointer)) = ctx.last_template.take() {
                        if let Some(slot) = template.pointer_mut(&pointer) {
                            *slot = Value::String(leftover);
                        }
                        let rendered = frame::render_event(event_type.as_deref(), &template);
                        ctx.pending.push_back(Bytes::from(rendered));
                    }
                }
                ctx.finished = true;
                return ctx.pending.pop_front().map(|frame| (Ok(frame), ctx));
            }
            Err(e) => {
                tracing::warn!(error = %e, "upstream SSE stream read failed");
                return None;
            }
        }
    }
}

fn push_event(ctx: &mut StreamCtx, event: frame::SseEvent) {
    match event.data {
        None => ctx.pending.push_back(Bytes::from(frame::render_done())),
        Some(mut data) => {
            if let Some(pointer) = dialect::stream_delta_pointer(ctx.dialect, event.event_type.as_deref(), &data) {
                if let Some(text) = data.pointer(&pointer).and_then(Value::as_str).map(str::to_string) {
                    let rehydrated = ctx.rehydrator.feed(&text);
                    if let Some(slot) = data.pointer_mut(&pointer) {
                        *slot = Value::String(rehydrated);
                    }
                    ctx.last_template = Some((event.event_type.clone(), data.clone(), pointer));
                }
            }
            let rendered = frame::render_event(event.event_type.as_deref(), &data);
            ctx.pending.push_back(Bytes::from(rendered));
        }
    }
}
