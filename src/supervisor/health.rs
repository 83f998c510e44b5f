//! Pure health metric calculation

use crate::session::ConnectionState;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Two-state supervisor mode layered over the cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SupervisorMode {
    Healthy,
    Recovering,
}

/// Snapshot of the session for logs and the host loop
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    pub mode: SupervisorMode,
    pub state: ConnectionState,
    pub reconnect_count: u32,
    /// Time since the broker session last became ready
    pub uptime: Option<Duration>,
    /// Informational only; the command topic is usually quiet
    pub time_since_last_message: Option<Duration>,
    pub clock_synced: bool,
    pub is_healthy: bool,
}

pub struct HealthMonitor;

impl HealthMonitor {
    /// Calculate health metrics (pure function)
    pub fn calculate_health_metrics(
        mode: SupervisorMode,
        state: ConnectionState,
        ready_since: Option<Instant>,
        last_message_time: Option<Instant>,
        reconnect_count: u32,
        clock_synced: bool,
    ) -> HealthMetrics {
        let now = Instant::now();
        let uptime = ready_since.map(|t| now.duration_since(t));
        let time_since_last_message = last_message_time.map(|t| now.duration_since(t));

        HealthMetrics {
            mode,
            state,
            reconnect_count,
            uptime,
            time_since_last_message,
            clock_synced,
            is_healthy: Self::determine_health_status(mode, state),
        }
    }

    /// Healthy means the supervisor is not recovering and the broker session is ready.
    /// Inbound silence and an unsynced clock do not count.
    fn determine_health_status(mode: SupervisorMode, state: ConnectionState) -> bool {
        mode == SupervisorMode::Healthy && state.is_broker_ready()
    }
}
