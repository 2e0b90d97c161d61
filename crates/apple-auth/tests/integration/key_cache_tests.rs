//! Key set cache integration tests
//!
//! Construction, refresh atomicity and the stale-but-available policy.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use apple_auth::error::{ConstructionError, FetchError};
use apple_auth::key_cache::KeySetCache;
use apple_auth_test_utils::{rsa_fixture, TestKeySource};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_construction_with_empty_key_set_fails() {
    let source = TestKeySource::new(Vec::new());

    let result = KeySetCache::new(source.clone()).await;

    assert!(matches!(
        result,
        Err(ConstructionError::Fetch(FetchError::EmptyKeySet))
    ));
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn test_construction_with_unreachable_source_fails() {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    source.fail_with(FetchError::Http("connection refused".to_string()));

    assert!(matches!(
        KeySetCache::new(source).await,
        Err(ConstructionError::Fetch(FetchError::Http(_)))
    ));
}

#[tokio::test]
async fn test_failed_refresh_leaves_snapshot_untouched() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = KeySetCache::new(source.clone()).await?;
    let before = cache.current();

    for error in [
        FetchError::Status(500),
        FetchError::Http("timeout".to_string()),
        FetchError::InvalidResponse("not json".to_string()),
    ] {
        source.fail_with(error.clone());
        assert_eq!(cache.refresh().await, Err(error));
        assert!(Arc::ptr_eq(&before, &cache.current()));
    }

    source.recover();
    source.publish(Vec::new());
    assert_eq!(cache.refresh().await, Err(FetchError::EmptyKeySet));
    assert_eq!(*cache.current(), *before);

    Ok(())
}

#[tokio::test]
async fn test_rotation_replaces_whole_snapshot() -> Result<(), anyhow::Error> {
    let one = rsa_fixture(1);
    let two = rsa_fixture(2);
    let source = TestKeySource::new(vec![one.public_record()]);
    let cache = KeySetCache::new(source.clone()).await?;
    let first_fetch = cache.current().fetched_at();

    source.publish(vec![two.public_record()]);
    let refreshed = cache.refresh().await?;

    assert_eq!(refreshed.key_ids(), vec![two.kid]);
    assert!(cache.lookup(one.kid).is_none());
    assert!(cache.lookup(two.kid).is_some());
    assert!(refreshed.fetched_at() >= first_fetch);

    Ok(())
}

/// Readers running while the key set flips between two disjoint sets must only
/// ever see one complete set or the other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_partial_snapshot() -> Result<(), anyhow::Error> {
    let one = rsa_fixture(1);
    let two = rsa_fixture(2);
    let set_a = vec![one.public_record_as("A1"), one.public_record_as("A2")];
    let set_b = vec![
        two.public_record_as("B1"),
        two.public_record_as("B2"),
        two.public_record_as("B3"),
    ];

    let source = TestKeySource::new(set_a.clone());
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);

    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        readers.push(tokio::spawn(async move {
            for _ in 0..2_000 {
                let ids = cache.current().key_ids().join(",");
                assert!(ids == "A1,A2" || ids == "B1,B2,B3", "observed {ids}");
                tokio::task::yield_now().await;
            }
        }));
    }

    for round in 0..50 {
        let next = if round % 2 == 0 { &set_b } else { &set_a };
        source.publish(next.clone());
        cache.refresh().await?;
    }

    for reader in readers {
        reader.await?;
    }

    Ok(())
}

#[tokio::test]
async fn test_concurrent_refreshes_are_serialized() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);
    source.delay_by(Duration::from_millis(20));

    let started = tokio::time::Instant::now();
    let tasks: Vec<_> = (0..3)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.refresh().await })
        })
        .collect();
    for task in tasks {
        task.await??;
    }

    // Three 20ms fetches one after another.
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(source.calls(), 4);

    Ok(())
}

#[tokio::test]
async fn test_lookup_during_outage_serves_stale_keys() -> Result<(), anyhow::Error> {
    let fixture = rsa_fixture(1);
    let source = TestKeySource::new(vec![fixture.public_record()]);
    let cache = KeySetCache::new(source.clone()).await?;

    source.fail_with(FetchError::Status(503));
    let _ = cache.refresh().await;

    let record = cache.lookup(fixture.kid).expect("stale key still served");
    assert_eq!(record, fixture.public_record());

    Ok(())
}
