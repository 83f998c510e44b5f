//! Broker session lifecycle
//!
//! Connects as the device identity with bounded retry, subscribes to the
//! command topic, publishes telemetry and delivers inbound messages. Inbound
//! messages are buffered in a bounded queue and drained synchronously by
//! [`PubSubSession::pump`], so commands are handled in arrival order on the
//! caller's task.

use super::{BrokerTransport, InboundMessage, SecureChannel};
use crate::config::BrokerSection;
use crate::error::BrokerError;
use crate::protocol::{
    parse_command, Command, DeviceIdentity, ParseError, TelemetrySample, MAX_PAYLOAD_BYTES,
};
use crate::retry::RetryPolicy;
use crate::session::{ConnectionState, SessionState};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Receiver of successfully parsed inbound commands
pub trait CommandHandler: Send {
    fn handle(&mut self, topic: &str, command: Command);
}

impl<F> CommandHandler for F
where
    F: FnMut(&str, Command) + Send,
{
    fn handle(&mut self, topic: &str, command: Command) {
        self(topic, command)
    }
}

/// Default handler: surface the command in the log
#[derive(Debug, Default)]
pub struct LogCommandHandler;

impl CommandHandler for LogCommandHandler {
    fn handle(&mut self, topic: &str, command: Command) {
        match command {
            Command::Message(message) => info!(topic, message = %message, "Command message"),
            Command::Raw(raw) => info!(topic, raw = %raw, "Command without message field"),
        }
    }
}

pub struct PubSubSession<T> {
    transport: T,
    identity: DeviceIdentity,
    connect_policy: RetryPolicy,
    retry_interval: Duration,
    write_timeout: Duration,
    inbound: VecDeque<InboundMessage>,
    inbound_capacity: usize,
    handler: Box<dyn CommandHandler>,
}

impl<T: BrokerTransport> PubSubSession<T> {
    pub fn new(transport: T, identity: DeviceIdentity, settings: &BrokerSection) -> Self {
        Self {
            transport,
            identity,
            connect_policy: settings.connect_policy(),
            retry_interval: Duration::from_millis(settings.retry_interval_ms),
            write_timeout: settings.write_timeout(),
            inbound: VecDeque::with_capacity(settings.inbound_queue_capacity),
            inbound_capacity: settings.inbound_queue_capacity.max(1),
            handler: Box::new(LogCommandHandler),
        }
    }

    /// Replace the command handler
    pub fn with_handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        self.handler = Box::new(handler);
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Connect to the broker and subscribe to the command topic
    ///
    /// Retries at the configured interval until the connect timeout elapses.
    /// On timeout the state is reset to `Disconnected` and the caller decides
    /// whether to run the cascade again.
    pub async fn connect(
        &mut self,
        channel: &SecureChannel,
        state: &mut SessionState,
    ) -> Result<(), BrokerError> {
        if state.connection() < ConnectionState::SecureReady {
            return Err(BrokerError::ConnectFailed(format!(
                "secure session not configured (state {:?})",
                state.connection()
            )));
        }

        let span = crate::broker_span!(
            host = %channel.host,
            client_id = %self.identity.thing_name
        );
        async {
            state.transition(ConnectionState::BrokerConnecting);
            info!("Connecting to broker");

            let policy = self.connect_policy.clone();
            let mut budget = policy.begin();
            loop {
                let attempt_timeout = budget
                    .remaining()
                    .map_or(self.retry_interval, |left| left.max(self.retry_interval));
                let attempt = tokio::time::timeout(
                    attempt_timeout,
                    self.transport.connect(channel, &self.identity.thing_name),
                )
                .await;

                match attempt {
                    Ok(Ok(())) => break,
                    Ok(Err(e)) => debug!(error = %e, "Broker connect attempt failed"),
                    Err(_) => debug!("Broker connect attempt timed out"),
                }

                match budget.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        let waited_ms = budget.elapsed().as_millis() as u64;
                        if let Err(e) = self.transport.disconnect().await {
                            debug!(error = %e, "Disconnect after connect timeout failed");
                        }
                        state.invalidate("broker connect timeout");
                        warn!(waited_ms, attempts = budget.attempts(), "Broker connect timed out");
                        return Err(BrokerError::ConnectTimeout {
                            waited_ms,
                            attempts: budget.attempts(),
                        });
                    }
                }
            }

            if let Err(e) = self.transport.subscribe(&self.identity.subscribe_topic).await {
                if let Err(disconnect_error) = self.transport.disconnect().await {
                    debug!(error = %disconnect_error, "Disconnect after failed subscribe failed");
                }
                state.invalidate("command subscription failed");
                return Err(e);
            }

            state.transition(ConnectionState::BrokerReady);
            info!(subscribe_topic = %self.identity.subscribe_topic, "Broker connected");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Serialise and publish a telemetry sample to the device's data topic
    ///
    /// Bounded by the write timeout. Failures are returned, never retried;
    /// the sample is not kept.
    pub async fn publish(&mut self, sample: &TelemetrySample) -> Result<(), BrokerError> {
        if !self.transport.is_connected() {
            return Err(BrokerError::NotConnected);
        }

        let payload = sample.to_payload().map_err(BrokerError::Serialization)?;
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(BrokerError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_BYTES,
            });
        }

        let topic = &self.identity.publish_topic;
        debug!(topic = %topic, payload = %String::from_utf8_lossy(&payload), "Publishing telemetry");

        match tokio::time::timeout(self.write_timeout, self.transport.publish(topic, payload)).await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(BrokerError::PublishFailed(reason))) => Err(BrokerError::PublishFailed(reason)),
            Ok(Err(e)) => Err(BrokerError::PublishFailed(e.to_string())),
            Err(_) => Err(BrokerError::PublishFailed(format!(
                "write did not complete within {}ms",
                self.write_timeout.as_millis()
            ))),
        }
    }

    /// Handle one inbound message
    ///
    /// Malformed payloads are logged with their raw bytes and returned as an
    /// error; connection state is never touched.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<Command, ParseError> {
        info!(topic, bytes = payload.len(), "Message received");
        match parse_command(topic, payload) {
            Ok(command) => {
                self.handler.handle(topic, command.clone());
                Ok(command)
            }
            Err(e) => {
                warn!(topic, error = %e.source, raw = %e.raw, "Discarding malformed message");
                Err(e)
            }
        }
    }

    /// Queue an inbound message, dropping the oldest when full
    pub fn enqueue(&mut self, message: InboundMessage) {
        if self.inbound.len() >= self.inbound_capacity {
            if let Some(dropped) = self.inbound.pop_front() {
                warn!(
                    topic = %dropped.topic,
                    capacity = self.inbound_capacity,
                    "Inbound queue full, dropping oldest message"
                );
            }
        }
        self.inbound.push_back(message);
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// Read/dispatch step: poll the transport, then drain the inbound queue
    ///
    /// Returns the number of messages handed to [`on_message`](Self::on_message).
    /// A transport error or drop invalidates the session state after
    /// whatever was already received has been delivered.
    pub async fn pump(&mut self, state: &mut SessionState) -> Result<usize, BrokerError> {
        let polled = self.transport.poll().await;
        let polled = match polled {
            Ok(messages) => {
                for message in messages {
                    self.enqueue(message);
                }
                Ok(())
            }
            Err(e) => Err(e),
        };

        let mut delivered = 0;
        while let Some(message) = self.inbound.pop_front() {
            let _ = self.on_message(&message.topic, &message.payload);
            delivered += 1;
        }

        if let Err(e) = polled {
            state.invalidate("broker transport error");
            return Err(e);
        }
        if !self.transport.is_connected() {
            state.invalidate("broker transport dropped");
            return Err(BrokerError::TransportDropped(
                "connection lost during poll".to_string(),
            ));
        }
        Ok(delivered)
    }

    /// Cheap liveness check
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn disconnect(&mut self, state: &mut SessionState) -> Result<(), BrokerError> {
        let result = self.transport.disconnect().await;
        state.invalidate("broker disconnect requested");
        result
    }
}
