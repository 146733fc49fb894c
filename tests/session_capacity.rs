//! Exercises the local store's capacity-eviction property end to end
//! (spec.md §8: "when local store exceeds 10,000, size becomes exactly
//! 9,000 with the 1,000 oldest removed").

use anonamoose::store::RehydrationStore;
use anonamoose::store::local::{LocalStore, MAX_LOCAL_SESSIONS};
use std::time::Duration;
use uuid::Uuid;

fn binding(original: &str) -> anonamoose::store::TokenBinding {
    anonamoose::store::TokenBinding {
        token: format!("\u{E000}EMAIL:{original}\u{E001}"),
        original: original.to_string(),
        detector_kind: "REGEX".to_string(),
        category: "EMAIL".to_string(),
        meta: None,
    }
}

#[tokio::test]
async fn eviction_trims_to_exactly_ninety_percent() {
    let store = LocalStore::new();
    for i in 0..(MAX_LOCAL_SESSIONS + 1) {
        let id = Uuid::new_v4().to_string();
        store
            .store(&id, vec![binding(&format!("user{i}@example.com"))], Duration::from_secs(3600))
            .await
            .unwrap();
    }
    // 10,001 sessions stored one at a time; capacity is only breached on the
    // final insert, which evicts ceil(10001 * 0.10) = 1,001 oldest sessions,
    // leaving exactly 9,000 (spec.md §8's concrete eviction scenario).
    let size = store.size().await.unwrap();
    assert_eq!(size, 9_000);
}

#[tokio::test]
async fn sessions_below_capacity_are_never_evicted() {
    let store = LocalStore::new();
    let mut ids = Vec::new();
    for i in 0..50 {
        let id = Uuid::new_v4().to_string();
        store
            .store(&id, vec![binding(&format!("user{i}@example.com"))], Duration::from_secs(3600))
            .await
            .unwrap();
        ids.push(id);
    }
    assert_eq!(store.size().await.unwrap(), 50);
    for id in ids {
        assert!(store.retrieve(&id).await.unwrap().is_some());
    }
}
