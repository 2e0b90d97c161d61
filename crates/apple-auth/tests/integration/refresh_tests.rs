//! Refresh scheduler integration tests
//!
//! Runs on a paused clock against an in-memory key source, so every tick is
//! driven explicitly.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use apple_auth::error::FetchError;
use apple_auth::key_cache::KeySetCache;
use apple_auth::refresh::{RefreshFailure, RefreshScheduler, SchedulerConfig};
use apple_auth::verifier::{SignatureVerifier, VerifierConfig};
use apple_auth_test_utils::{rsa_fixture, TestIdTokenBuilder, TestKeySource};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PERIOD: Duration = Duration::from_secs(32 * 60);

/// Move the paused clock forward and let the refresh task run.
async fn advance(by: Duration) {
    tokio::time::advance(by).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_picks_up_rotated_keys() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);
    let verifier = SignatureVerifier::new(Arc::clone(&cache), VerifierConfig::default());

    let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), SchedulerConfig::new(PERIOD));
    scheduler.start()?;

    let new_token = TestIdTokenBuilder::new().signed_with(rsa_fixture(2)).build();
    assert!(verifier.verify(&new_token).is_err());

    source.publish(vec![rsa_fixture(2).public_record()]);
    advance(PERIOD).await;

    verifier.verify(&new_token)?;
    assert_eq!(source.calls(), 2);
    scheduler.stop().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_sustained_failure_reports_and_keeps_serving() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);
    let verifier = SignatureVerifier::new(Arc::clone(&cache), VerifierConfig::default());

    let failures: Arc<Mutex<Vec<RefreshFailure>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&failures);
    let config = SchedulerConfig::new(PERIOD)
        .with_failure_handler(move |failure| recorded.lock().unwrap().push(failure.clone()));

    source.fail_with(FetchError::Status(503));
    let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), config);
    scheduler.start()?;

    advance(PERIOD).await;
    advance(PERIOD).await;
    scheduler.stop().await;

    let failures = failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 2);
    for failure in &failures {
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.last_error, Some(FetchError::Status(503)));
    }
    // Initial fetch plus three attempts per failed tick.
    assert_eq!(source.calls(), 7);

    // Verification still works against the stale snapshot.
    verifier.verify(&TestIdTokenBuilder::new().build())?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_key_set_counts_as_failure() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);

    let last_errors: Arc<Mutex<Vec<Option<FetchError>>>> = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&last_errors);
    let config = SchedulerConfig::new(PERIOD).with_failure_handler(move |failure| {
        recorded.lock().unwrap().push(failure.last_error.clone());
    });

    source.publish(Vec::new());
    let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), config);
    scheduler.start()?;
    advance(PERIOD).await;
    scheduler.stop().await;

    assert_eq!(
        *last_errors.lock().unwrap(),
        vec![Some(FetchError::EmptyKeySet)]
    );
    assert_eq!(cache.current().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_recovery_after_outage() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);
    let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), SchedulerConfig::new(PERIOD));

    source.fail_with(FetchError::Http("connection reset".to_string()));
    scheduler.start()?;
    advance(PERIOD).await;
    let stale = cache.current();
    assert_eq!(stale.key_ids(), vec!["TESTKEY001"]);

    source.recover();
    source.publish(vec![rsa_fixture(2).public_record()]);
    advance(PERIOD).await;
    scheduler.stop().await;

    assert!(!Arc::ptr_eq(&stale, &cache.current()));
    assert_eq!(cache.current().key_ids(), vec!["TESTKEY002"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_abandons_in_flight_fetch() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);
    source.delay_by(Duration::from_secs(10));
    source.publish(vec![rsa_fixture(2).public_record()]);

    let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), SchedulerConfig::new(PERIOD));
    scheduler.start()?;
    // The tick begins its slow fetch; stop while it is still sleeping.
    advance(PERIOD).await;
    assert_eq!(source.calls(), 2);
    scheduler.stop().await;

    let snapshot_at_stop = cache.current();
    advance(Duration::from_secs(30)).await;

    assert_eq!(source.calls(), 2);
    assert!(Arc::ptr_eq(&snapshot_at_stop, &cache.current()));
    assert_eq!(cache.current().key_ids(), vec!["TESTKEY001"]);
    assert!(cache.is_closed());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropping_scheduler_stops_refreshes() -> Result<(), anyhow::Error> {
    let source = TestKeySource::new(vec![rsa_fixture(1).public_record()]);
    let cache = Arc::new(KeySetCache::new(source.clone()).await?);

    let mut scheduler = RefreshScheduler::new(Arc::clone(&cache), SchedulerConfig::new(PERIOD));
    scheduler.start()?;
    advance(PERIOD).await;
    drop(scheduler);

    advance(PERIOD * 2).await;

    assert_eq!(source.calls(), 2);
    assert!(cache.is_closed());
    Ok(())
}
