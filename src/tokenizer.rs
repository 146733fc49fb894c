//! Opaque token minting.
//!
//! Tokens are PUA-delimited strings of the form `\u{E000}<hex>\u{E001}` —
//! sentinel, hex id, sentinel, with no category embedded in the wire form.
//! The hex body carries at least 32 bits of entropy; on collision within a
//! session the generator retries with a wider id before giving up.

use crate::config::settings::{DEFAULT_SENTINEL_CLOSE, DEFAULT_SENTINEL_OPEN};
use rand::RngCore;
use rand::rngs::OsRng;

const MAX_COLLISION_RETRIES: u32 = 8;
const INITIAL_ID_BYTES: usize = 4;

/// Mints a fresh opaque token, guaranteed not to appear in `existing` (the
/// set of tokens already bound in the current session).
///
/// Retries widen the id by one byte every [`MAX_COLLISION_RETRIES`] attempts
/// so pathologically small sessions never loop forever on a 32-bit clash.
pub fn mint(open: char, close: char, existing: &dyn Fn(&str) -> bool) -> String {
    let mut id_bytes = INITIAL_ID_BYTES;
    let mut attempt = 0u32;
    loop {
        let token = format!("{open}{}{close}", random_hex(id_bytes));
        if !existing(&token) {
            return token;
        }
        attempt += 1;
        if attempt % MAX_COLLISION_RETRIES == 0 {
            id_bytes += 1;
        }
    }
}

/// Convenience wrapper using the default PUA sentinels.
pub fn mint_default(existing: &dyn Fn(&str) -> bool) -> String {
    mint(DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE, existing)
}

fn random_hex(num_bytes: usize) -> String {
    let mut buf = vec![0u8; num_bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Whether `s` looks like a minted token: opens with `open`, closes with
/// `close`, and has a non-empty body in between.
pub fn is_token(s: &str, open: char, close: char) -> bool {
    let mut chars = s.chars();
    if chars.next() != Some(open) {
        return false;
    }
    let Some(last) = s.chars().last() else {
        return false;
    };
    if last != close {
        return false;
    }
    s.chars().count() > 2
}

/// Scans `text` for every substring delimited by `open`/`close`, returning
/// `(start_char_idx, end_char_idx_exclusive, token_str)` triples in order of
/// appearance. Used by the rehydration pass and by the streaming SSE buffer
/// to find token boundaries without assuming tokens are whole regex matches.
pub fn extract_all(text: &str, open: char, close: char) -> Vec<(usize, usize, String)> {
    let mut out = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == open {
            if let Some(rel_end) = chars[i + 1..].iter().position(|&c| c == close) {
                let end = i + 1 + rel_end + 1;
                let token: String = chars[i..end].iter().collect();
                out.push((i, end, token));
                i = end;
                continue;
            }
        }
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_is_well_formed() {
        let token = mint_default(&|_| false);
        assert!(is_token(&token, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE));
        assert!(token.starts_with(DEFAULT_SENTINEL_OPEN));
        assert!(token.ends_with(DEFAULT_SENTINEL_CLOSE));
        let body: String = token
            .chars()
            .filter(|&c| c != DEFAULT_SENTINEL_OPEN && c != DEFAULT_SENTINEL_CLOSE)
            .collect();
        assert!(body.len() >= 8);
        assert!(body.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn mint_retries_on_collision() {
        let calls = std::cell::Cell::new(0);
        let token = mint_default(&|_candidate| {
            let n = calls.get() + 1;
            calls.set(n);
            n < 3
        });
        assert!(is_token(&token, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE));
        assert!(calls.get() >= 3);
    }

    #[test]
    fn is_token_rejects_plain_text() {
        assert!(!is_token("hello world", DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE));
        assert!(!is_token("\u{E000}", DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE));
    }

    #[test]
    fn extract_all_finds_multiple_tokens() {
        let text = format!(
            "hi {o}EMAIL:ab12{c}, call {o}PHONE:ff00{c} now",
            o = DEFAULT_SENTINEL_OPEN,
            c = DEFAULT_SENTINEL_CLOSE
        );
        let found = extract_all(&text, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE);
        assert_eq!(found.len(), 2);
        assert!(found[0].2.contains("EMAIL"));
        assert!(found[1].2.contains("PHONE"));
    }

    #[test]
    fn extract_all_ignores_unterminated_open() {
        let text = format!("broken {o}NOPE", o = DEFAULT_SENTINEL_OPEN);
        let found = extract_all(&text, DEFAULT_SENTINEL_OPEN, DEFAULT_SENTINEL_CLOSE);
        assert!(found.is_empty());
    }
}
