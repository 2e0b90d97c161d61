//! In-memory key sources
//!
//! [`TestKeySource`] serves whatever key set the test currently publishes and
//! can be told to fail, so cache and scheduler behavior can be driven without
//! a network.

use apple_auth::error::FetchError;
use apple_auth::key_cache::KeySource;
use apple_auth::keys::{JwkSet, PublicKeyRecord};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mutable in-memory key source.
#[derive(Default)]
pub struct TestKeySource {
    keys: Mutex<Vec<PublicKeyRecord>>,
    failure: Mutex<Option<FetchError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicU32,
}

impl TestKeySource {
    /// Source publishing `keys`.
    pub fn new(keys: Vec<PublicKeyRecord>) -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(keys),
            ..Self::default()
        })
    }

    /// Replace the published keys.
    pub fn publish(&self, keys: Vec<PublicKeyRecord>) {
        *self.keys.lock().unwrap() = keys;
    }

    /// Make every subsequent fetch fail with `error`.
    pub fn fail_with(&self, error: FetchError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    /// Stop failing.
    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }

    /// Delay each fetch by `delay`.
    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Number of fetches so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for TestKeySource {
    async fn fetch_keys(&self) -> Result<JwkSet, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(JwkSet {
            keys: self.keys.lock().unwrap().clone(),
        })
    }
}
