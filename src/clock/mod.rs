//! Wall-clock synchronisation
//!
//! [`ClockSync::sync`] queries a [`TimeSource`] at a fixed poll interval
//! until it gets a valid time or the timeout elapses. Every query is itself
//! capped at one poll interval, so a call never outlives its timeout by more
//! than one poll interval. Failure only degrades timestamps.

pub mod sntp;

use crate::config::ClockSection;
use crate::error::TimeSyncError;
use crate::retry::{RetryLimit, RetryPolicy};
use crate::session::ClockState;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

pub use sntp::SntpTimeSource;

/// Network time query
#[async_trait]
pub trait TimeSource: Send + Sync {
    /// Current Unix epoch time in milliseconds
    async fn query(&self) -> Result<u64, TimeSyncError>;
}

/// Bounded clock synchronisation over a [`TimeSource`]
pub struct ClockSync<S> {
    source: S,
    timeout: Duration,
    poll_interval: Duration,
}

impl<S: TimeSource> ClockSync<S> {
    pub fn new(source: S, settings: &ClockSection) -> Self {
        Self {
            source,
            timeout: settings.sync_timeout(),
            poll_interval: settings.poll_interval(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Sync with the configured timeout
    pub async fn sync(&self, clock: &mut ClockState) -> Result<u64, TimeSyncError> {
        self.sync_within(self.timeout, clock).await
    }

    /// Sync, giving up once `timeout` has elapsed
    ///
    /// On failure the clock is marked unsynced and keeps its stale value.
    pub async fn sync_within(
        &self,
        timeout: Duration,
        clock: &mut ClockState,
    ) -> Result<u64, TimeSyncError> {
        let span = crate::clock_span!(timeout_ms = timeout.as_millis() as u64);
        async {
            let policy = RetryPolicy::fixed(self.poll_interval, RetryLimit::Elapsed(timeout));
            let mut budget = policy.begin();
            info!("Syncing time");

            loop {
                match tokio::time::timeout(self.poll_interval, self.source.query()).await {
                    Ok(Ok(epoch_ms)) => {
                        clock.record_sync(epoch_ms);
                        info!(
                            epoch_ms,
                            time = %clock.describe(),
                            attempts = budget.attempts() + 1,
                            "Time synced"
                        );
                        return Ok(epoch_ms);
                    }
                    Ok(Err(e)) => debug!(error = %e, "Time query failed"),
                    Err(_) => debug!("Time query got no answer within poll interval"),
                }

                match budget.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        let waited_ms = budget.elapsed().as_millis() as u64;
                        clock.mark_unsynced();
                        warn!(
                            waited_ms,
                            last_synced = %clock.describe(),
                            "Failed to sync time, continuing with unsynced clock"
                        );
                        return Err(TimeSyncError::Timeout { waited_ms });
                    }
                }
            }
        }
        .instrument(span)
        .await
    }
}
