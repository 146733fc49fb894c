//! Rehydration store: session-keyed
//! persistence of `{token -> original, metadata}` behind one interface with
//! two backends — [`local::LocalStore`] (in-process) and
//! [`remote::RemoteStore`] (Redis-backed).

pub mod local;
pub mod remote;

use crate::errors::AnonamooseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// `{token, original, detectorKind, category, optional meta}`.
/// Bindings within a session are deduplicated by `original`, not by `token`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBinding {
    pub token: String,
    pub original: String,
    pub detector_kind: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// A TTL-bounded, insertion-ordered collection of bindings identified by a
/// UUIDv4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub bindings: Vec<TokenBinding>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: Uuid, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            bindings: Vec::new(),
            created_at: now,
            last_accessed_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Appends only bindings whose `original` is not already present,
    /// preserving insertion order and (I3) uniqueness-by-original.
    pub fn merge_bindings(&mut self, incoming: Vec<TokenBinding>) {
        for binding in incoming {
            if !self.bindings.iter().any(|b| b.original == binding.original) {
                self.bindings.push(binding);
            }
        }
    }

    pub fn find_token_for_original(&self, original: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| b.original == original)
            .map(|b| b.token.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StorageStats {
    pub session_count: usize,
    pub total_bindings: usize,
    pub backend: &'static str,
}

/// Parses and validates a session id string into a [`Uuid`]. Per spec
/// "ID validation": callers that tolerate an invalid id (retrieve,
/// hydrate, delete, extend) get `None`; `store` maps the `None` case to
/// [`AnonamooseError::InvalidSessionId`] itself.
pub fn parse_session_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

#[async_trait]
pub trait RehydrationStore: Send + Sync {
    async fn store(
        &self,
        session_id: &str,
        bindings: Vec<TokenBinding>,
        ttl: Duration,
    ) -> Result<Session, AnonamooseError>;

    async fn retrieve(&self, session_id: &str) -> Result<Option<Session>, AnonamooseError>;

    /// Replaces every token occurrence in `text` with its bound original.
    /// Unknown tokens pass through unchanged; a missing/expired/invalid
    /// session returns `text` verbatim.
    async fn hydrate(&self, text: &str, session_id: &str) -> Result<String, AnonamooseError>;

    async fn delete(&self, session_id: &str) -> Result<bool, AnonamooseError>;

    async fn delete_all(&self) -> Result<usize, AnonamooseError>;

    async fn extend(&self, session_id: &str, ttl: Duration) -> Result<bool, AnonamooseError>;

    async fn size(&self) -> Result<usize, AnonamooseError>;

    /// All non-expired sessions, sorted by `createdAt` descending.
    async fn all_sessions(&self) -> Result<Vec<Session>, AnonamooseError>;

    async fn search(&self, query: &str) -> Result<Vec<Session>, AnonamooseError>;

    async fn storage_stats(&self) -> Result<StorageStats, AnonamooseError>;
}

/// Single linear-pass token replacement over `text` using the session's
/// bindings, avoiding quadratic `indexOf`-style scanning for sessions with
/// many tokens. Tokens are recognized
/// by the PUA sentinel grammar, not a regex compiled per call.
pub fn hydrate_text(text: &str, session: &Session, open: char, close: char) -> String {
    let tokens = crate::tokenizer::extract_all(text, open, close);
    if tokens.is_empty() {
        return text.to_string();
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, token) in tokens {
        out.extend(&chars[cursor..start]);
        match session.bindings.iter().find(|b| b.token == token) {
            Some(binding) => out.push_str(&binding.original),
            None => out.push_str(&token),
        }
        cursor = end;
    }
    out.extend(&chars[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::{DEFAULT_SENTINEL_CLOSE, DEFAULT_SENTINEL_OPEN};

    fn binding(token: &str, original: &str) -> TokenBinding {
        TokenBinding {
            token: token.to_string(),
            original: original.to_string(),
            detector_kind: "REGEX".to_string(),
            category: "EMAIL".to_string(),
            meta: None,
        }
    }

    #[test]
    fn merge_bindings_dedups_by_original() {
        let mut session = Session::new(Uuid::new_v4(), Duration::from_secs(60));
        session.merge_bindings(vec![binding("t1", "jane@example.com")]);
        session.merge_bindings(vec![binding("t2", "jane@example.com")]);
        assert_eq!(session.bindings.len(), 1);
        assert_eq!(session.bindings[0].token, "t1");
    }

    #[test]
    fn hydrate_text_replaces_known_token_leaves_unknown() {
        let mut session = Session::new(Uuid::new_v4(), Duration::from_secs(60));
        session.merge_bindings(vec![binding(
            &format!("{}EMAIL:ab12{}", DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE),
            "jane@example.com",
        )]);
        let text = format!(
            "contact {}EMAIL:ab12{} or {}PHONE:zzzz{}",
            DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE
        );
        let out = hydrate_text(&text, &session, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE);
        assert!(out.contains("jane@example.com"));
        assert!(out.contains("PHONE:zzzz"));
    }

    #[test]
    fn parse_session_id_rejects_non_uuid() {
        assert!(parse_session_id("not-a-uuid").is_none());
        assert!(parse_session_id(&Uuid::new_v4().to_string()).is_some());
    }

    #[test]
    fn session_is_expired_after_ttl() {
        let session = Session::new(Uuid::new_v4(), Duration::from_secs(0));
        assert!(session.is_expired(Utc::now() + chrono::Duration::seconds(1)));
    }
}
