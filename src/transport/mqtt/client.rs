//! Impure I/O operations for the MQTT transport
//!
//! Wraps a rumqttc v5 client and event loop. There is no background task:
//! the event loop is driven only from within `connect`, `subscribe`,
//! `publish` and `poll`, on the caller's task.

use super::connection::{configure_mqtt_options, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::error::BrokerError;
use crate::transport::{BrokerTransport, InboundMessage, SecureChannel};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long `poll` waits for the next event before yielding back
const DEFAULT_POLL_WINDOW: Duration = Duration::from_millis(10);

/// Most events handled by a single `poll`
const MAX_EVENTS_PER_POLL: usize = 64;

/// Bound on waiting for a SubAck
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// MQTT over mutual TLS
pub struct RumqttcTransport {
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    connected: bool,
    subscribe_topic: Option<String>,
    pending: Vec<InboundMessage>,
    poll_window: Duration,
    ack_timeout: Duration,
}

impl Default for RumqttcTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RumqttcTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop: None,
            connected: false,
            subscribe_topic: None,
            pending: Vec::new(),
            poll_window: DEFAULT_POLL_WINDOW,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Poll the event loop once and apply the routed event
    ///
    /// Returns the route so callers can wait for a specific event.
    async fn step(&mut self) -> Result<EventRoute, BrokerError> {
        let event_loop = self.event_loop.as_mut().ok_or(BrokerError::NotConnected)?;

        let event = match event_loop.poll().await {
            Ok(event) => event,
            Err(e) => {
                self.connected = false;
                return Err(BrokerError::TransportDropped(e.to_string()));
            }
        };

        let route = MessageHandler::route_mqtt_event(&event);
        match &route {
            EventRoute::ConnectionAcknowledged => self.connected = true,
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                let expected = self.subscribe_topic.as_deref().unwrap_or(topic.as_str());
                if MessageHandler::should_process_message(topic, *retain, expected) {
                    self.pending.push(InboundMessage::new(topic.clone(), payload.clone()));
                }
            }
            EventRoute::Disconnected => {
                warn!("Broker sent disconnect");
                self.connected = false;
            }
            EventRoute::SubscriptionConfirmed { .. } | EventRoute::OutgoingEvent => {}
            EventRoute::InfrastructureEvent(event) => debug!(event = %event, "MQTT event"),
        }
        Ok(route)
    }

    fn client(&self) -> Result<&AsyncClient, BrokerError> {
        match (&self.client, self.connected) {
            (Some(client), true) => Ok(client),
            _ => Err(BrokerError::NotConnected),
        }
    }
}

#[async_trait]
impl BrokerTransport for RumqttcTransport {
    async fn connect(
        &mut self,
        channel: &SecureChannel,
        client_id: &str,
    ) -> Result<(), BrokerError> {
        let options = configure_mqtt_options(client_id, channel);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        self.client = Some(client);
        self.event_loop = Some(event_loop);
        self.connected = false;
        self.pending.clear();

        loop {
            match self.step().await {
                Ok(EventRoute::ConnectionAcknowledged) => {
                    info!(host = %channel.host, port = channel.port, "Broker acknowledged connection");
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => {
                    self.event_loop = None;
                    self.client = None;
                    return Err(BrokerError::ConnectFailed(e.to_string()));
                }
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::SubscribeFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        self.subscribe_topic = Some(topic.to_string());

        let ack_timeout = self.ack_timeout;
        let wait = tokio::time::timeout(ack_timeout, async {
            loop {
                if let EventRoute::SubscriptionConfirmed { return_codes, .. } = self.step().await? {
                    return MessageHandler::validate_subscription_success(&return_codes).map_err(
                        |reason| BrokerError::SubscribeFailed {
                            topic: topic.to_string(),
                            reason,
                        },
                    );
                }
            }
        })
        .await;

        match wait {
            Ok(result) => result,
            Err(_) => Err(BrokerError::SubscribeFailed {
                topic: topic.to_string(),
                reason: format!("no SubAck within {}ms", ack_timeout.as_millis()),
            }),
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        // Drive the event loop until the request has been written out
        loop {
            if let EventRoute::OutgoingEvent = self.step().await? {
                return Ok(());
            }
        }
    }

    async fn poll(&mut self) -> Result<Vec<InboundMessage>, BrokerError> {
        if self.event_loop.is_none() {
            return Err(BrokerError::NotConnected);
        }

        for _ in 0..MAX_EVENTS_PER_POLL {
            match tokio::time::timeout(self.poll_window, self.step()).await {
                Err(_) => break,
                Ok(Ok(EventRoute::Disconnected)) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e),
            }
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let result = match (&self.client, self.connected) {
            (Some(client), true) => client
                .disconnect()
                .await
                .map_err(|e| BrokerError::TransportDropped(e.to_string())),
            _ => Ok(()),
        };

        if result.is_ok() && self.connected {
            // Flush the disconnect packet; errors here mean the socket is already gone
            let _ = tokio::time::timeout(self.poll_window, self.step()).await;
        }

        self.connected = false;
        self.client = None;
        self.event_loop = None;
        self.pending.clear();
        info!("MQTT transport disconnected");
        result
    }
}
