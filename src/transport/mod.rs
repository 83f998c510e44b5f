//! Broker transport for the sensor node
//!
//! [`SecureSession`] turns the trust bundle and endpoint into a
//! [`SecureChannel`], [`PubSubSession`] runs the broker lifecycle over a
//! [`BrokerTransport`]. The MQTT implementation lives in [`mqtt`].

pub mod mqtt;
pub mod pubsub;
pub mod secure;

use crate::error::BrokerError;
use async_trait::async_trait;

pub use pubsub::{CommandHandler, LogCommandHandler, PubSubSession};
pub use secure::{SecureChannel, SecureSession};

/// Message received on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Broker client abstraction
///
/// Each method is a single attempt; retry and timeouts belong to
/// [`PubSubSession`]. This keeps transports dumb and lets tests substitute a
/// mock broker.
#[async_trait]
pub trait BrokerTransport: Send {
    /// One connect attempt including the TLS handshake
    async fn connect(&mut self, channel: &SecureChannel, client_id: &str)
        -> Result<(), BrokerError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Run one read/dispatch step: keepalive plus whatever inbound messages are ready
    async fn poll(&mut self) -> Result<Vec<InboundMessage>, BrokerError>;

    /// Last known liveness, without I/O
    fn is_connected(&self) -> bool;

    async fn disconnect(&mut self) -> Result<(), BrokerError>;
}
