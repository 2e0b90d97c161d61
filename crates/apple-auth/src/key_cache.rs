//! Cache of the provider's public signing keys.
//!
//! The cache holds one immutable [`KeySetSnapshot`] behind an atomic pointer.
//! Readers (`current`, `lookup`, and every verification) never take a lock and
//! always see either the old or the new snapshot in full. A refresh builds a
//! fresh snapshot and swaps it in; a failed refresh leaves the previous snapshot
//! in place (stale-but-available).
//!
//! Refreshes are serialized internally, so at most one fetch is in flight no
//! matter how many tasks call [`KeySetCache::refresh`].

use crate::error::{ConstructionError, FetchError};
use crate::keys::{JwkSet, KeySetSnapshot, PublicKeyRecord};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Where key sets come from.
///
/// Implementations perform exactly one attempt per call with a bounded timeout.
/// Retries are the scheduler's decision, not the source's.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the currently published key set.
    async fn fetch_keys(&self) -> Result<JwkSet, FetchError>;
}

/// Atomically swapped snapshot of provider keys.
pub struct KeySetCache {
    source: Arc<dyn KeySource>,
    snapshot: ArcSwap<KeySetSnapshot>,
    refresh_lock: Mutex<()>,
    closed: AtomicBool,
}

impl std::fmt::Debug for KeySetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("KeySetCache")
            .field("key_ids", &snapshot.key_ids())
            .field("fetched_at", &snapshot.fetched_at())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl KeySetCache {
    /// Build a cache and perform the initial fetch.
    ///
    /// # Errors
    ///
    /// Returns `ConstructionError::Fetch` if the initial fetch fails or yields
    /// no keys. A cache that cannot verify anything is never handed out.
    #[instrument(skip_all)]
    pub async fn new(source: Arc<dyn KeySource>) -> Result<Self, ConstructionError> {
        let cache = Self {
            source,
            snapshot: ArcSwap::from_pointee(KeySetSnapshot::empty()),
            refresh_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        };

        cache.refresh().await.map_err(|e| {
            tracing::error!(
                target: "apple_auth.key_cache",
                error = %e,
                "Initial key set fetch failed"
            );
            ConstructionError::Fetch(e)
        })?;

        Ok(cache)
    }

    /// Fetch the key set once and swap it in on success.
    ///
    /// # Errors
    ///
    /// - `FetchError::Closed` if the cache has been shut down
    /// - `FetchError::EmptyKeySet` if the provider returned no keys
    /// - any error from the [`KeySource`]
    ///
    /// On error the current snapshot is left untouched.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<Arc<KeySetSnapshot>, FetchError> {
        if self.is_closed() {
            return Err(FetchError::Closed);
        }

        let _guard = self.refresh_lock.lock().await;

        let set = self.source.fetch_keys().await.map_err(|e| {
            tracing::warn!(target: "apple_auth.key_cache", error = %e, "Key set fetch failed");
            e
        })?;

        if set.keys.is_empty() {
            tracing::warn!(target: "apple_auth.key_cache", "Provider returned an empty key set");
            return Err(FetchError::EmptyKeySet);
        }

        // The fetch may have outlived a concurrent close.
        if self.is_closed() {
            return Err(FetchError::Closed);
        }

        warn_on_duplicate_kids(&set.keys);

        let snapshot = Arc::new(KeySetSnapshot::new(set.keys, chrono::Utc::now()));
        self.snapshot.store(Arc::clone(&snapshot));

        tracing::info!(
            target: "apple_auth.key_cache",
            key_count = snapshot.len(),
            "Key set refreshed"
        );

        Ok(snapshot)
    }

    /// The latest successfully fetched snapshot. Never blocks.
    #[must_use]
    pub fn current(&self) -> Arc<KeySetSnapshot> {
        self.snapshot.load_full()
    }

    /// Find a key by identifier in the current snapshot.
    ///
    /// `None` usually means the key rotated out or the token is forged; callers
    /// should treat it as fatal for the token at hand.
    #[must_use]
    pub fn lookup(&self, kid: &str) -> Option<PublicKeyRecord> {
        let found = self.snapshot.load().find(kid).cloned();
        if found.is_none() {
            tracing::debug!(target: "apple_auth.key_cache", kid = %kid, "Key not found in current snapshot");
        }
        found
    }

    /// Refuse further refreshes. The last snapshot stays readable.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!(target: "apple_auth.key_cache", "Key set cache closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn warn_on_duplicate_kids(keys: &[PublicKeyRecord]) {
    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key.kid.as_str()) {
            tracing::warn!(
                target: "apple_auth.key_cache",
                kid = %key.kid,
                "Duplicate key id in key set, first occurrence wins"
            );
        }
    }
}
