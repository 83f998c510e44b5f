//! Connection state owned by the session supervisor
//!
//! All mutable state of the connectivity core lives in [`SessionState`]: the
//! connection stage, the credential cursor and the clock. The supervisor owns
//! it and lends it by `&mut` to one stage at a time, so there is exactly one
//! writer without any global.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stage of the NetworkLink / SecureSession / PubSubSession stack
///
/// Ordered: within one attempt cycle the state only moves forward, and any
/// detected failure resets it to `Disconnected`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Associating,
    Associated,
    SecureHandshaking,
    SecureReady,
    BrokerConnecting,
    BrokerReady,
}

impl ConnectionState {
    /// The lower network layer is up
    pub fn is_associated(&self) -> bool {
        *self >= ConnectionState::Associated
    }

    pub fn is_broker_ready(&self) -> bool {
        *self == ConnectionState::BrokerReady
    }
}

/// Approximate wall-clock time, maintained only by clock sync
#[derive(Debug, Clone, Default)]
pub struct ClockState {
    last_synced_epoch_ms: u64,
    sync_valid: bool,
    synced_at: Option<Instant>,
}

impl ClockState {
    /// Record a successful sync
    pub fn record_sync(&mut self, epoch_ms: u64) {
        self.last_synced_epoch_ms = epoch_ms;
        self.sync_valid = true;
        self.synced_at = Some(Instant::now());
    }

    /// Mark the clock as not synchronised; the last value is kept and goes stale
    pub fn mark_unsynced(&mut self) {
        self.sync_valid = false;
    }

    pub fn last_synced_epoch_ms(&self) -> u64 {
        self.last_synced_epoch_ms
    }

    pub fn sync_valid(&self) -> bool {
        self.sync_valid
    }

    /// Current epoch milliseconds extrapolated from the last sync, zero if never synced
    pub fn now_epoch_ms(&self) -> u64 {
        match self.synced_at {
            Some(at) => self
                .last_synced_epoch_ms
                .saturating_add(at.elapsed().as_millis() as u64),
            None => 0,
        }
    }

    /// Human-readable form of the last synced time for logs
    pub fn describe(&self) -> String {
        match self.synced_at {
            None => "never synced".to_string(),
            Some(_) => DateTime::<Utc>::from_timestamp_millis(self.last_synced_epoch_ms as i64)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| format!("{}ms", self.last_synced_epoch_ms)),
        }
    }
}

/// Explicit session state (single writer: the supervisor)
#[derive(Debug, Default)]
pub struct SessionState {
    connection: ConnectionState,
    cursor: usize,
    last_known_good: Option<usize>,
    clock: ClockState,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Move forward to `next`, returning false for a backwards move
    ///
    /// Backwards moves other than a reset are refused and leave the state as is.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        let from = self.connection;
        if next < from && next != ConnectionState::Disconnected {
            warn!(from = ?from, to = ?next, "Refusing backwards connection state transition");
            return false;
        }
        if next != from {
            log_state_transition(from, next);
            self.connection = next;
        }
        true
    }

    /// Reset to `Disconnected` after a detected failure, invalidating every layer
    pub fn invalidate(&mut self, reason: &str) {
        if self.connection != ConnectionState::Disconnected {
            warn!(from = ?self.connection, reason, "Connection invalidated");
            self.connection = ConnectionState::Disconnected;
        }
    }

    /// Index of the credential tried first on the next connect
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    /// Index of the credential that last associated successfully
    pub fn last_known_good(&self) -> Option<usize> {
        self.last_known_good
    }

    pub(crate) fn record_association(&mut self, index: usize) {
        self.cursor = index;
        self.last_known_good = Some(index);
    }

    pub fn clock(&self) -> &ClockState {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut ClockState {
        &mut self.clock
    }
}

fn log_state_transition(from: ConnectionState, to: ConnectionState) {
    match (from, to) {
        (_, ConnectionState::Associated) => info!("Network link associated"),
        (_, ConnectionState::SecureReady) => info!("Secure session configured"),
        (_, ConnectionState::BrokerReady) => info!("Broker session ready"),
        (_, ConnectionState::Disconnected) => warn!(from = ?from, "Connection lost"),
        _ => debug!("Connection state: {:?} -> {:?}", from, to),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connection_state_ordering() {
        assert!(ConnectionState::Disconnected < ConnectionState::Associating);
        assert!(ConnectionState::Associated < ConnectionState::SecureHandshaking);
        assert!(ConnectionState::BrokerConnecting < ConnectionState::BrokerReady);

        assert!(!ConnectionState::Associating.is_associated());
        assert!(ConnectionState::Associated.is_associated());
        assert!(ConnectionState::BrokerReady.is_associated());
        assert!(ConnectionState::BrokerReady.is_broker_ready());
        assert!(!ConnectionState::SecureReady.is_broker_ready());
    }

    #[test]
    fn test_transition_forward_only() {
        let mut state = SessionState::new();
        assert!(state.transition(ConnectionState::Associating));
        assert!(state.transition(ConnectionState::Associated));
        assert!(state.transition(ConnectionState::SecureReady));

        assert!(!state.transition(ConnectionState::Associating));
        assert_eq!(state.connection(), ConnectionState::SecureReady);

        assert!(state.transition(ConnectionState::Disconnected));
        assert_eq!(state.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_invalidate_resets() {
        let mut state = SessionState::new();
        state.transition(ConnectionState::BrokerReady);
        state.invalidate("test drop");
        assert_eq!(state.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_record_association_updates_cursor() {
        let mut state = SessionState::new();
        assert_eq!(state.last_known_good(), None);
        state.set_cursor(1);
        state.record_association(1);
        assert_eq!(state.cursor(), 1);
        assert_eq!(state.last_known_good(), Some(1));
    }

    #[test]
    fn test_clock_never_synced_reads_zero() {
        let clock = ClockState::default();
        assert!(!clock.sync_valid());
        assert_eq!(clock.now_epoch_ms(), 0);
        assert_eq!(clock.describe(), "never synced");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_extrapolates_from_sync() {
        let mut clock = ClockState::default();
        clock.record_sync(1_700_000_000_000);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(clock.sync_valid());
        let now = clock.now_epoch_ms();
        assert!((1_700_000_001_500..1_700_000_001_510).contains(&now));
        assert!(clock.describe().starts_with("2023-11-14T"));
    }

    #[test]
    fn test_clock_unsynced_keeps_stale_value() {
        let mut clock = ClockState::default();
        clock.record_sync(42_000);
        clock.mark_unsynced();
        assert!(!clock.sync_valid());
        assert_eq!(clock.last_synced_epoch_ms(), 42_000);
        assert!(clock.now_epoch_ms() >= 42_000);
    }
}
