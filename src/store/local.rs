//! In-process rehydration store backend.
//!
//! A single `tokio::sync::Mutex`-guarded map serializes all session
//! mutations. Expired sessions are swept lazily on any read and also by the
//! periodic background task started alongside the proxy server.

use super::{RehydrationStore, Session, StorageStats, TokenBinding, hydrate_text, parse_session_id};
use crate::config::settings::{DEFAULT_SENTINEL_CLOSE, DEFAULT_SENTINEL_OPEN};
use crate::errors::AnonamooseError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

pub const MAX_LOCAL_SESSIONS: usize = 10_000;
const EVICTION_FRACTION: f64 = 0.10;

pub struct LocalStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    sentinel_open: char,
    sentinel_close: char,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            sentinel_open: DEFAULT_SENTINEL_OPEN,
            sentinel_close: DEFAULT_SENTINEL_CLOSE,
        }
    }

    pub fn with_sentinels(open: char, close: char) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            sentinel_open: open,
            sentinel_close: close,
        }
    }

    fn sweep_expired(map: &mut HashMap<Uuid, Session>) {
        let now = Utc::now();
        map.retain(|_, s| !s.is_expired(now));
    }

    /// Evicts the oldest 10% by `createdAt` once the map exceeds
    /// [`MAX_LOCAL_SESSIONS`].
    fn evict_if_over_capacity(map: &mut HashMap<Uuid, Session>) {
        if map.len() <= MAX_LOCAL_SESSIONS {
            return;
        }
        let evict_count = ((map.len() as f64) * EVICTION_FRACTION).ceil() as usize;
        let mut ids_by_age: Vec<(Uuid, chrono::DateTime<Utc>)> =
            map.iter().map(|(id, s)| (*id, s.created_at)).collect();
        ids_by_age.sort_by_key(|(_, created)| *created);
        for (id, _) in ids_by_age.into_iter().take(evict_count) {
            map.remove(&id);
        }
        info!(evicted = evict_count, "local store evicted oldest sessions over capacity");
    }
}

#[async_trait]
impl RehydrationStore for LocalStore {
    async fn store(
        &self,
        session_id: &str,
        bindings: Vec<TokenBinding>,
        ttl: Duration,
    ) -> Result<Session, AnonamooseError> {
        let id = parse_session_id(session_id)
            .ok_or_else(|| AnonamooseError::InvalidSessionId(session_id.to_string()))?;

        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        let entry = map
            .entry(id)
            .or_insert_with(|| Session::new(id, ttl));
        entry.merge_bindings(bindings);
        entry.expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let result = entry.clone();
        Self::evict_if_over_capacity(&mut map);
        Ok(result)
    }

    async fn retrieve(&self, session_id: &str) -> Result<Option<Session>, AnonamooseError> {
        let Some(id) = parse_session_id(session_id) else {
            return Ok(None);
        };
        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        if let Some(session) = map.get_mut(&id) {
            session.last_accessed_at = Utc::now();
            return Ok(Some(session.clone()));
        }
        Ok(None)
    }

    async fn hydrate(&self, text: &str, session_id: &str) -> Result<String, AnonamooseError> {
        let Some(id) = parse_session_id(session_id) else {
            return Ok(text.to_string());
        };
        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        let Some(session) = map.get_mut(&id) else {
            return Ok(text.to_string());
        };
        session.last_accessed_at = Utc::now();
        Ok(hydrate_text(text, session, self.sentinel_open, self.sentinel_close))
    }

    async fn delete(&self, session_id: &str) -> Result<bool, AnonamooseError> {
        let Some(id) = parse_session_id(session_id) else {
            return Ok(false);
        };
        let mut map = self.sessions.lock().await;
        Ok(map.remove(&id).is_some())
    }

    async fn delete_all(&self) -> Result<usize, AnonamooseError> {
        let mut map = self.sessions.lock().await;
        let count = map.len();
        map.clear();
        Ok(count)
    }

    async fn extend(&self, session_id: &str, ttl: Duration) -> Result<bool, AnonamooseError> {
        let Some(id) = parse_session_id(session_id) else {
            return Ok(false);
        };
        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        if let Some(session) = map.get_mut(&id) {
            session.expires_at = Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
            return Ok(true);
        }
        Ok(false)
    }

    async fn size(&self) -> Result<usize, AnonamooseError> {
        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        Ok(map.len())
    }

    async fn all_sessions(&self) -> Result<Vec<Session>, AnonamooseError> {
        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        let mut sessions: Vec<Session> = map.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn search(&self, query: &str) -> Result<Vec<Session>, AnonamooseError> {
        let needle = query.to_lowercase();
        let sessions = self.all_sessions().await?;
        Ok(sessions
            .into_iter()
            .filter(|s| {
                s.session_id.to_string().contains(&needle)
                    || s.bindings.iter().any(|b| {
                        b.original.to_lowercase().contains(&needle)
                            || b.category.to_lowercase().contains(&needle)
                    })
            })
            .collect())
    }

    async fn storage_stats(&self) -> Result<StorageStats, AnonamooseError> {
        let mut map = self.sessions.lock().await;
        Self::sweep_expired(&mut map);
        let total_bindings = map.values().map(|s| s.bindings.len()).sum();
        Ok(StorageStats {
            session_count: map.len(),
            total_bindings,
            backend: "local",
        })
    }
}

/// Periodic maintenance sweep, spawned alongside the proxy server to
/// complement the lazy-on-read sweep above.
pub async fn run_expiry_sweep_loop(store: std::sync::Arc<LocalStore>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let mut map = store.sessions.lock().await;
        let before = map.len();
        LocalStore::sweep_expired(&mut map);
        let removed = before - map.len();
        if removed > 0 {
            info!(removed, "periodic sweep removed expired sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(token: &str, original: &str) -> TokenBinding {
        TokenBinding {
            token: token.to_string(),
            original: original.to_string(),
            detector_kind: "REGEX".to_string(),
            category: "EMAIL".to_string(),
            meta: None,
        }
    }

    #[tokio::test]
    async fn store_then_retrieve_roundtrips() {
        let store = LocalStore::new();
        let id = Uuid::new_v4().to_string();
        store
            .store(&id, vec![binding("t1", "jane@example.com")], Duration::from_secs(60))
            .await
            .unwrap();
        let session = store.retrieve(&id).await.unwrap().unwrap();
        assert_eq!(session.bindings.len(), 1);
    }

    #[tokio::test]
    async fn store_invalid_session_id_errors() {
        let store = LocalStore::new();
        let result = store.store("not-a-uuid", vec![], Duration::from_secs(60)).await;
        assert!(matches!(result, Err(AnonamooseError::InvalidSessionId(_))));
    }

    #[tokio::test]
    async fn retrieve_invalid_session_id_returns_none() {
        let store = LocalStore::new();
        assert!(store.retrieve("not-a-uuid").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hydrate_missing_session_returns_verbatim() {
        let store = LocalStore::new();
        let id = Uuid::new_v4().to_string();
        let out = store.hydrate("hello world", &id).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn dedup_on_store_reuses_existing_token() {
        let store = LocalStore::new();
        let id = Uuid::new_v4().to_string();
        store
            .store(&id, vec![binding("t1", "jane@example.com")], Duration::from_secs(60))
            .await
            .unwrap();
        store
            .store(&id, vec![binding("t2", "jane@example.com")], Duration::from_secs(60))
            .await
            .unwrap();
        let session = store.retrieve(&id).await.unwrap().unwrap();
        assert_eq!(session.bindings.len(), 1);
        assert_eq!(session.bindings[0].token, "t1");
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let store = LocalStore::new();
        let id = Uuid::new_v4().to_string();
        store
            .store(&id, vec![binding("t1", "x")], Duration::from_secs(60))
            .await
            .unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(store.retrieve(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eviction_trims_to_ninety_percent_at_capacity() {
        let store = LocalStore::new();
        for _ in 0..(MAX_LOCAL_SESSIONS + 1) {
            let id = Uuid::new_v4().to_string();
            store
                .store(&id, vec![binding("t", "v")], Duration::from_secs(3600))
                .await
                .unwrap();
        }
        let size = store.size().await.unwrap();
        assert!(size <= MAX_LOCAL_SESSIONS);
    }
}
