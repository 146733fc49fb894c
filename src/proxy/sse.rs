//! Boundary-safe SSE rehydration.
//!
//! The upstream delivers `data: {json}\n\n` events whose decoded content
//! delta may split a token string across exactly one event boundary. A
//! rolling trailing buffer of size `maxTokenLen - 1` guarantees no partial
//! token ever escapes rehydration: we only ever emit the prefix of a delta
//! that cannot possibly contain a partial token, and hold the rest back for
//! the next delta (or stream end).

use crate::store::{RehydrationStore, Session, hydrate_text};
use std::sync::Arc;

/// Upper bound on a minted token's character length used to size the
/// trailing buffer. A token is `sentinel_open(1) + hex_id + sentinel_close(1)`;
/// the id starts at 8 hex digits and only widens on a same-session
/// collision, so 24 hex digits comfortably covers even a pathologically
/// collision-heavy session.
pub const MAX_TOKEN_LEN: usize = 26;

/// Per-stream rehydration state. One instance lives for the lifetime of a
/// single SSE response.
pub struct StreamRehydrator {
    trailing: String,
    sentinel_open: char,
    sentinel_close: char,
    session: Option<Session>,
}

impl StreamRehydrator {
    pub fn new(session: Option<Session>, sentinel_open: char, sentinel_close: char) -> Self {
        Self { trailing: String::new(), sentinel_open, sentinel_close, session }
    }

    /// Feeds the next decoded content delta, returning the portion safe to
    /// emit immediately. The unsafe trailing portion (shorter than
    /// `MAX_TOKEN_LEN - 1` characters) is retained for the next call.
    pub fn feed(&mut self, delta: &str) -> String {
        self.trailing.push_str(delta);
        let chars: Vec<char> = self.trailing.chars().collect();
        let safe_len = chars.len().saturating_sub(MAX_TOKEN_LEN - 1);
        let safe: String = chars[..safe_len].iter().collect();
        self.trailing = chars[safe_len..].iter().collect();
        self.rehydrate(&safe)
    }

    /// Flushes any retained trailing buffer at stream end.
    pub fn flush(&mut self) -> String {
        let remaining = std::mem::take(&mut self.trailing);
        self.rehydrate(&remaining)
    }

    fn rehydrate(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        match &self.session {
            Some(session) => hydrate_text(text, session, self.sentinel_open, self.sentinel_close),
            None => text.to_string(),
        }
    }
}

/// Looks up the session (if any) once at stream start, so the per-chunk
/// rehydrator never needs to hit the store mid-stream (tokens are minted
/// only during the redact phase before forwarding: no store writes during streaming).
pub async fn load_session_for_stream(
    store: &Arc<dyn RehydrationStore>,
    session_id: Option<&str>,
) -> Option<Session> {
    let session_id = session_id?;
    store.retrieve(session_id).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TokenBinding;
    use chrono::Utc;
    use uuid::Uuid;

    fn session_with(token: &str, original: &str) -> Session {
        let now = Utc::now();
        Session {
            session_id: Uuid::new_v4(),
            bindings: vec![TokenBinding {
                token: token.to_string(),
                original: original.to_string(),
                detector_kind: "REGEX".to_string(),
                category: "PERSON".to_string(),
                meta: None,
            }],
            created_at: now,
            last_accessed_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn token_split_across_two_feeds_still_rehydrates() {
        let open = '\u{E000}';
        let close = '\u{E001}';
        let token = format!("{open}abc1{close}");
        let session = session_with(&token, "Dave");
        let mut r = StreamRehydrator::new(Some(session), open, close);

        let mid = token.chars().count() / 2;
        let token_chars: Vec<char> = token.chars().collect();
        let part1: String = token_chars[..mid].iter().collect();
        let part2: String = token_chars[mid..].iter().collect();

        let mut out = String::new();
        out.push_str(&r.feed(&format!("Hello {part1}")));
        out.push_str(&r.feed(&format!("{part2}!")));
        out.push_str(&r.flush());

        assert_eq!(out, "Hello Dave!");
    }

    #[test]
    fn no_session_passes_through_unchanged() {
        let mut r = StreamRehydrator::new(None, '\u{E000}', '\u{E001}');
        let mut out = String::new();
        out.push_str(&r.feed("plain text, no tokens here"));
        out.push_str(&r.flush());
        assert_eq!(out, "plain text, no tokens here");
    }

    #[test]
    fn short_deltas_eventually_flush_fully() {
        let mut r = StreamRehydrator::new(None, '\u{E000}', '\u{E001}');
        let mut out = String::new();
        for word in ["one ", "two ", "three "] {
            out.push_str(&r.feed(word));
        }
        out.push_str(&r.flush());
        assert_eq!(out, "one two three ");
    }
}
