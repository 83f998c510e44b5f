//! Session supervisor
//!
//! Called by the host loop on every tick. While the broker session is alive
//! a tick pumps inbound traffic; otherwise it runs the reconnect cascade
//! (link, clock, secure session, broker session). A stage failure aborts the
//! cascade for this tick and the next tick starts again from the top.

pub mod health;

use crate::clock::{ClockSync, TimeSource};
use crate::config::TrustBundle;
use crate::error::{BrokerError, NodeError, NodeResult};
use crate::link::{Indicator, LinkDriver, NetworkLink};
use crate::protocol::TelemetrySample;
use crate::session::{ConnectionState, SessionState};
use crate::transport::{BrokerTransport, PubSubSession, SecureSession};
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

pub use health::{HealthMetrics, HealthMonitor, SupervisorMode};

/// What a single tick did
#[derive(Debug)]
pub enum TickOutcome {
    /// Session alive; this many inbound messages were delivered
    Pumped { delivered: usize },
    /// The cascade ran and the broker session is ready again
    Reconnected,
    /// The session dropped during the pump; the next tick recovers
    Lost(NodeError),
    /// A cascade stage failed; the next tick retries from the top
    RecoveryAborted(NodeError),
}

/// Owner of the session state and every cascade stage
pub struct SessionSupervisor<D, I, S, T> {
    link: NetworkLink<D, I>,
    clock: ClockSync<S>,
    secure: SecureSession,
    pubsub: PubSubSession<T>,
    trust: TrustBundle,
    state: SessionState,
    mode: SupervisorMode,
    clock_attempted: bool,
    connect_count: u32,
    ready_since: Option<Instant>,
    last_message_at: Option<Instant>,
}

impl<D, I, S, T> SessionSupervisor<D, I, S, T>
where
    D: LinkDriver,
    I: Indicator,
    S: TimeSource,
    T: BrokerTransport,
{
    pub fn new(
        link: NetworkLink<D, I>,
        clock: ClockSync<S>,
        secure: SecureSession,
        pubsub: PubSubSession<T>,
        trust: TrustBundle,
    ) -> Self {
        Self {
            link,
            clock,
            secure,
            pubsub,
            trust,
            state: SessionState::new(),
            mode: SupervisorMode::Recovering,
            clock_attempted: false,
            connect_count: 0,
            ready_since: None,
            last_message_at: None,
        }
    }

    /// One supervisor step
    pub async fn tick(&mut self) -> TickOutcome {
        let span = crate::supervisor_span!(mode = ?self.mode, state = ?self.state.connection());
        async {
            if self.pubsub.is_connected() && self.state.connection().is_broker_ready() {
                return match self.pubsub.pump(&mut self.state).await {
                    Ok(delivered) => {
                        if delivered > 0 {
                            self.last_message_at = Some(Instant::now());
                        }
                        TickOutcome::Pumped { delivered }
                    }
                    Err(e) => {
                        warn!(error = %e, "Broker session lost");
                        self.mode = SupervisorMode::Recovering;
                        self.ready_since = None;
                        TickOutcome::Lost(e.into())
                    }
                };
            }

            if self.mode == SupervisorMode::Healthy {
                warn!("Broker session disconnected, reconnecting");
            }
            self.mode = SupervisorMode::Recovering;
            self.ready_since = None;

            match self.recover().await {
                Ok(()) => {
                    self.mode = SupervisorMode::Healthy;
                    self.connect_count += 1;
                    self.ready_since = Some(Instant::now());
                    info!(
                        reconnect_count = self.reconnect_count(),
                        clock = %self.state.clock().describe(),
                        "Session established"
                    );
                    TickOutcome::Reconnected
                }
                Err(e) => {
                    match &e {
                        NodeError::Config(_) => error!(error = %e, kind = e.kind(), "Cascade aborted"),
                        _ => warn!(error = %e, kind = e.kind(), "Cascade aborted"),
                    }
                    TickOutcome::RecoveryAborted(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Full reconnect cascade
    async fn recover(&mut self) -> NodeResult<()> {
        self.state.invalidate("reconnect cascade");

        let fresh_association = if self.link.is_associated().await {
            debug!("Network link still associated");
            self.state.transition(ConnectionState::Associated);
            false
        } else {
            self.link.connect(&mut self.state).await?;
            true
        };

        if fresh_association || !self.clock_attempted {
            self.clock_attempted = true;
            if let Err(e) = self.clock.sync(self.state.clock_mut()).await {
                warn!(error = %e, "Proceeding without synced clock");
            }
        }

        let channel = self.secure.configure(&self.trust, &mut self.state)?;
        self.pubsub.connect(channel, &mut self.state).await?;
        Ok(())
    }

    /// Publish a sample on the live session
    pub async fn publish(&mut self, sample: &TelemetrySample) -> Result<(), BrokerError> {
        self.pubsub.publish(sample).await
    }

    /// Epoch milliseconds for a telemetry timestamp (zero if never synced)
    pub fn timestamp_ms(&self) -> u64 {
        self.state.clock().now_epoch_ms()
    }

    pub fn health(&self) -> HealthMetrics {
        HealthMonitor::calculate_health_metrics(
            self.mode,
            self.state.connection(),
            self.ready_since,
            self.last_message_at,
            self.reconnect_count(),
            self.state.clock().sync_valid(),
        )
    }

    /// Successful cascades after the first one
    pub fn reconnect_count(&self) -> u32 {
        self.connect_count.saturating_sub(1)
    }

    pub fn mode(&self) -> SupervisorMode {
        self.mode
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn link(&self) -> &NetworkLink<D, I> {
        &self.link
    }

    pub fn pubsub(&self) -> &PubSubSession<T> {
        &self.pubsub
    }

    /// Handle an inbound message outside of a pump (transport callback path)
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let _ = self.pubsub.on_message(topic, payload);
    }

    /// Close the broker session; the network link is left up
    pub async fn shutdown(&mut self) -> Result<(), BrokerError> {
        info!("Shutting down broker session");
        let result = self.pubsub.disconnect(&mut self.state).await;
        self.mode = SupervisorMode::Recovering;
        self.ready_since = None;
        result
    }
}
