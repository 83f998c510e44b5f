//! Lower-layer network association with ordered credential fallback
//!
//! [`NetworkLink::connect`] walks the configured credentials starting at the
//! session cursor. Each candidate gets a bounded number of status polls; a
//! candidate that does not associate advances the cursor, raises the failure
//! indicator and the walk continues. The call only returns once a candidate
//! associates, so with no reachable network it blocks forever.

pub mod nmcli;
pub mod static_link;

use crate::config::{CursorPolicy, LinkDriverKind, LinkSection, NetworkCredential};
use crate::error::NetworkError;
use crate::retry::RetryPolicy;
use crate::session::{ConnectionState, SessionState};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

pub use nmcli::NmcliLink;
pub use static_link::StaticLink;

/// Association status reported by a link driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Associating,
    Associated,
    Failed,
}

/// Radio or host network stack that performs the actual association
#[async_trait]
pub trait LinkDriver: Send + Sync {
    /// Issue an association request; returns without waiting for the result
    async fn begin(&self, credential: &NetworkCredential) -> Result<(), NetworkError>;

    /// Current association status, cheap enough to poll
    async fn status(&self) -> Result<LinkStatus, NetworkError>;

    async fn disconnect(&self) -> Result<(), NetworkError>;
}

/// Blink sequence of the failure indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub count: u32,
    pub on_time: Duration,
}

/// Signal raised every time a candidate network is given up on
pub const CANDIDATE_FAILED_BLINK: BlinkPattern = BlinkPattern {
    count: 2,
    on_time: Duration::from_millis(1000),
};

/// Observable failure signal (status LED on a board, a log line on a host)
#[async_trait]
pub trait Indicator: Send + Sync {
    async fn signal_failure(&self, pattern: BlinkPattern);
}

/// Indicator for hosts without a status LED
#[derive(Debug, Default, Clone)]
pub struct LogIndicator;

#[async_trait]
impl Indicator for LogIndicator {
    async fn signal_failure(&self, pattern: BlinkPattern) {
        warn!(
            blink_count = pattern.count,
            blink_ms = pattern.on_time.as_millis() as u64,
            "Failure indicator"
        );
        tokio::time::sleep(pattern.on_time * pattern.count).await;
    }
}

/// Credential fallback over a [`LinkDriver`]
pub struct NetworkLink<D, I> {
    driver: D,
    indicator: I,
    credentials: Vec<NetworkCredential>,
    candidate_policy: RetryPolicy,
    exhausted_backoff: Duration,
    cursor_policy: CursorPolicy,
}

impl<D: LinkDriver, I: Indicator> NetworkLink<D, I> {
    pub fn new(
        driver: D,
        indicator: I,
        credentials: Vec<NetworkCredential>,
        settings: &LinkSection,
    ) -> Self {
        Self {
            driver,
            indicator,
            credentials,
            candidate_policy: settings.candidate_policy(),
            exhausted_backoff: Duration::from_millis(settings.exhausted_backoff_ms),
            cursor_policy: settings.cursor_policy,
        }
    }

    pub fn credentials(&self) -> &[NetworkCredential] {
        &self.credentials
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Whether the driver currently reports an association
    pub async fn is_associated(&self) -> bool {
        matches!(self.driver.status().await, Ok(LinkStatus::Associated))
    }

    /// Associate with the first reachable candidate, starting at the session cursor
    ///
    /// Only fails when there are no credentials at all. On success the cursor
    /// and last-known-good index point at the associated candidate and the
    /// state is `Associated`.
    pub async fn connect(&self, state: &mut SessionState) -> Result<(), NetworkError> {
        if self.credentials.is_empty() {
            return Err(NetworkError::NoCredentials);
        }

        let last = self.credentials.len() - 1;
        let mut cursor = state.cursor().min(last);
        state.set_cursor(cursor);
        state.transition(ConnectionState::Associating);

        loop {
            let credential = &self.credentials[cursor];
            let span = crate::link_span!(ssid = %credential.ssid, cursor);

            match self.try_candidate(credential).instrument(span).await {
                Ok(polls) => {
                    info!(ssid = %credential.ssid, cursor, polls, "Associated with network");
                    state.record_association(cursor);
                    state.transition(ConnectionState::Associated);
                    return Ok(());
                }
                Err(e) => {
                    warn!(ssid = %credential.ssid, cursor, error = %e, "Candidate network failed");
                    self.indicator.signal_failure(CANDIDATE_FAILED_BLINK).await;

                    if cursor == last {
                        warn!(
                            candidates = self.credentials.len(),
                            backoff_ms = self.exhausted_backoff.as_millis() as u64,
                            policy = ?self.cursor_policy,
                            "Tried all networks"
                        );
                        tokio::time::sleep(self.exhausted_backoff).await;
                    }
                    cursor = next_cursor(cursor, self.credentials.len(), self.cursor_policy);
                    state.set_cursor(cursor);
                }
            }
        }
    }

    /// Begin association and poll status until associated or the budget runs out
    async fn try_candidate(&self, credential: &NetworkCredential) -> Result<u32, NetworkError> {
        debug!("Connecting to network");
        self.driver.begin(credential).await?;

        let mut budget = self.candidate_policy.begin();
        loop {
            match self.driver.status().await {
                Ok(LinkStatus::Associated) => return Ok(budget.attempts() + 1),
                Ok(status) => debug!(?status, "Not associated yet"),
                Err(e) => debug!(error = %e, "Link status query failed"),
            }

            match budget.next_delay() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(NetworkError::AssociationTimeout {
                        ssid: credential.ssid.clone(),
                        polls: budget.attempts(),
                    })
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<(), NetworkError> {
        self.driver.disconnect().await
    }
}

/// Link driver selected by `[link] driver`
#[derive(Debug, Clone)]
pub enum HostLinkDriver {
    Nmcli(NmcliLink),
    Static(StaticLink),
}

impl HostLinkDriver {
    pub fn from_settings(settings: &LinkSection) -> Self {
        match settings.driver {
            LinkDriverKind::Nmcli => Self::Nmcli(NmcliLink::new(settings.interface.clone())),
            LinkDriverKind::Static => Self::Static(StaticLink),
        }
    }
}

#[async_trait]
impl LinkDriver for HostLinkDriver {
    async fn begin(&self, credential: &NetworkCredential) -> Result<(), NetworkError> {
        match self {
            Self::Nmcli(link) => link.begin(credential).await,
            Self::Static(link) => link.begin(credential).await,
        }
    }

    async fn status(&self) -> Result<LinkStatus, NetworkError> {
        match self {
            Self::Nmcli(link) => link.status().await,
            Self::Static(link) => link.status().await,
        }
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        match self {
            Self::Nmcli(link) => link.disconnect().await,
            Self::Static(link) => link.disconnect().await,
        }
    }
}

/// Cursor after a failed candidate (pure function)
pub fn next_cursor(cursor: usize, len: usize, policy: CursorPolicy) -> usize {
    if len == 0 {
        return 0;
    }
    match policy {
        CursorPolicy::Saturate => (cursor + 1).min(len - 1),
        CursorPolicy::Wrap => (cursor + 1) % len,
    }
}
