//! Background key set refresh.
//!
//! [`RefreshScheduler`] owns one background task that re-fetches the provider
//! key set every period. Each tick makes up to [`MAX_ATTEMPTS_PER_TICK`]
//! back-to-back attempts; when all of them fail the configured failure handler
//! runs and the cache keeps serving its previous snapshot.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --start()--> Running --stop()--> Stopped (terminal)
//! ```
//!
//! `stop` cancels the task, waits for it to exit and closes the cache. After it
//! returns no timer-triggered refresh runs. Dropping a running scheduler
//! cancels the task without waiting and also closes the cache.

use crate::error::{FetchError, SchedulerError};
use crate::key_cache::KeySetCache;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Refresh attempts made on each tick before reporting failure.
pub const MAX_ATTEMPTS_PER_TICK: u32 = 3;

/// Details handed to the failure handler.
#[derive(Debug, Clone)]
pub struct RefreshFailure {
    /// Attempts made on the failed tick.
    pub attempts: u32,

    /// Error from the last attempt.
    pub last_error: Option<FetchError>,

    /// Age of the snapshot still being served.
    pub snapshot_age: Option<chrono::Duration>,
}

/// Callback invoked when a tick exhausts its attempts.
pub type RefreshFailureHandler = Arc<dyn Fn(&RefreshFailure) + Send + Sync>;

/// Scheduler timing and failure reporting.
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub period: Duration,

    /// Called when a tick exhausts its attempts.
    pub on_failure: RefreshFailureHandler,
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("period", &self.period)
            .field("on_failure", &"<handler>")
            .finish()
    }
}

impl SchedulerConfig {
    /// Scheduler with the given period and a no-op failure handler.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            on_failure: Arc::new(|_: &RefreshFailure| {}),
        }
    }

    /// Set the failure handler.
    #[must_use]
    pub fn with_failure_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&RefreshFailure) + Send + Sync + 'static,
    {
        self.with_failure_handler_arc(Arc::new(handler))
    }

    /// Set an already shared failure handler.
    #[must_use]
    pub fn with_failure_handler_arc(mut self, handler: RefreshFailureHandler) -> Self {
        self.on_failure = handler;
        self
    }
}

enum State {
    Idle,
    Running {
        cancel_token: CancellationToken,
        handle: JoinHandle<()>,
    },
    Stopped,
}

/// Owned background task that keeps a [`KeySetCache`] fresh.
pub struct RefreshScheduler {
    cache: Arc<KeySetCache>,
    config: SchedulerConfig,
    state: State,
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle => "Idle",
            State::Running { .. } => "Running",
            State::Stopped => "Stopped",
        };
        f.debug_struct("RefreshScheduler")
            .field("state", &state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RefreshScheduler {
    /// Create an idle scheduler for `cache`.
    #[must_use]
    pub fn new(cache: Arc<KeySetCache>, config: SchedulerConfig) -> Self {
        Self {
            cache,
            config,
            state: State::Idle,
        }
    }

    /// Spawn the background task. The first tick fires one period from now.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyRunning` if already started
    /// - `SchedulerError::Stopped` if stopped before
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        match self.state {
            State::Idle => {}
            State::Running { .. } => return Err(SchedulerError::AlreadyRunning),
            State::Stopped => return Err(SchedulerError::Stopped),
        }

        let cancel_token = CancellationToken::new();
        let first_tick = tokio::time::Instant::now() + self.config.period;
        let handle = tokio::spawn(refresh_loop(
            Arc::clone(&self.cache),
            self.config.clone(),
            first_tick,
            cancel_token.clone(),
        ));

        self.state = State::Running {
            cancel_token,
            handle,
        };
        Ok(())
    }

    /// Stop the task, wait for it to exit and close the cache.
    ///
    /// Calling `stop` on an idle or already stopped scheduler only moves it to
    /// `Stopped`.
    #[instrument(skip_all)]
    pub async fn stop(&mut self) {
        let previous = std::mem::replace(&mut self.state, State::Stopped);
        if let State::Running {
            cancel_token,
            handle,
        } = previous
        {
            cancel_token.cancel();
            if let Err(e) = handle.await {
                warn!(target: "apple_auth.refresh", error = %e, "Refresh task ended abnormally");
            }
        }
        self.cache.close();
    }

    /// Whether the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, State::Stopped)
    }
}

/// Dropping a running scheduler cancels its task without waiting and closes
/// the cache, like [`RefreshScheduler::stop`]. A scheduler that never started
/// leaves the cache open.
impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let State::Running { cancel_token, .. } = &self.state {
            cancel_token.cancel();
            self.cache.close();
        }
    }
}

#[instrument(skip_all, name = "apple_auth.refresh_loop")]
async fn refresh_loop(
    cache: Arc<KeySetCache>,
    config: SchedulerConfig,
    first_tick: tokio::time::Instant,
    cancel_token: CancellationToken,
) {
    info!(
        target: "apple_auth.refresh",
        period_secs = config.period.as_secs(),
        "Starting key set refresh task"
    );

    let mut interval = tokio::time::interval_at(first_tick, config.period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = interval.tick() => {}
        }

        // A tick in progress is abandoned on cancellation; the snapshot swap is
        // atomic so nothing is left half-written.
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            () = run_tick(&cache, &config) => {}
        }
    }

    info!(target: "apple_auth.refresh", "Key set refresh task stopped");
}

async fn run_tick(cache: &KeySetCache, config: &SchedulerConfig) {
    let mut last_error = None;

    for attempt in 1..=MAX_ATTEMPTS_PER_TICK {
        match cache.refresh().await {
            Ok(_) => return,
            Err(FetchError::Closed) => return,
            Err(e) => {
                warn!(
                    target: "apple_auth.refresh",
                    attempt = attempt,
                    max_attempts = MAX_ATTEMPTS_PER_TICK,
                    error = %e,
                    "Key set refresh attempt failed"
                );
                last_error = Some(e);
            }
        }
    }

    let failure = RefreshFailure {
        attempts: MAX_ATTEMPTS_PER_TICK,
        last_error,
        snapshot_age: cache.current().age(chrono::Utc::now()),
    };

    error!(
        target: "apple_auth.refresh",
        attempts = failure.attempts,
        snapshot_age_secs = failure.snapshot_age.map(|a| a.num_seconds()),
        "Key set refresh failed, serving stale keys"
    );

    (config.on_failure)(&failure);
}
