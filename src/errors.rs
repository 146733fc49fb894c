use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Typed error hierarchy for anonamoose.
///
/// Use at module boundaries (pipeline entry, store API, proxy handlers).
/// Leaf/internal code can keep returning `anyhow::Result` — the `Internal`
/// variant lets it flow through `?` unchanged.
#[derive(Debug, Error)]
pub enum AnonamooseError {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("NER layer unavailable: {0}")]
    NERUnavailable(String),

    #[error("store backend unreachable: {0}")]
    StoreBackendDown(String),

    #[error("store backend error: {0}")]
    BackendError(String),

    #[error("upstream error ({status}): {body}")]
    UpstreamError { status: u16, body: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `AnonamooseError`.
pub type AnonamooseResult<T> = std::result::Result<T, AnonamooseError>;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl AnonamooseError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSessionId(_) => "InvalidSessionId",
            Self::NERUnavailable(_) => "NERUnavailable",
            Self::StoreBackendDown(_) => "StoreBackendDown",
            Self::BackendError(_) => "BackendError",
            Self::UpstreamError { .. } => "UpstreamError",
            Self::BadRequest(_) => "BadRequest",
            Self::Unauthorized => "Unauthorized",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether this error is transient and the caller should consider retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreBackendDown(_) | Self::NERUnavailable(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSessionId(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BackendError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::NERUnavailable(_) | Self::StoreBackendDown(_) | Self::Internal(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }
}

impl IntoResponse for AnonamooseError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        let detail = match &self {
            Self::UpstreamError { body, .. } => Some(body.clone()),
            Self::Internal(e) => Some(e.to_string()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            kind,
            detail,
        };
        (status, Json(body)).into_response()
    }
}
