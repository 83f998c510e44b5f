//! rumqttc-backed broker transport
//!
//! Split the way the pure and impure halves separate:
//!
//! - [`connection`] - pure option and TLS configuration
//! - [`message_handler`] - pure event routing
//! - [`client`] - the [`BrokerTransport`](crate::transport::BrokerTransport) implementation

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttcTransport;
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};
