//! Terranode - connectivity core for a greenhouse sensor node
//!
//! Keeps a node attached to a cloud broker over mutual TLS and publishes
//! telemetry samples on a fixed topic.
//!
//! # Overview
//!
//! The connection is a cascade of stages, each one depending on the previous:
//! - [`link::NetworkLink`] associates with one of an ordered list of networks
//! - [`clock::ClockSync`] obtains wall-clock time (best effort)
//! - [`transport::SecureSession`] validates the endpoint and trust bundle
//! - [`transport::PubSubSession`] connects, subscribes and publishes
//!
//! [`supervisor::SessionSupervisor`] is ticked by the host loop and reruns the
//! whole cascade from the top whenever the broker session is gone.
//!
//! # Quick Start
//!
//! ```rust
//! use terranode::protocol::{DeviceIdentity, TelemetrySample};
//!
//! let identity = DeviceIdentity::derive("esp32", "verde-terra", "dev1").unwrap();
//! assert_eq!(identity.publish_topic, "esp32/data/verde-terra/dev1");
//! assert_eq!(identity.subscribe_topic, "esp32/commands/verde-terra/dev1");
//!
//! let sample = TelemetrySample {
//!     device_id: identity.thing_name.clone(),
//!     timestamp_ms: 1_700_000_000_000,
//!     air_temp_c: Some(21.5),
//!     air_humidity_pct: Some(55.0),
//!     soil_moisture_pct: Some(40.0),
//!     soil_temp_c: None,
//! };
//! let payload = sample.to_payload().unwrap();
//! assert!(!payload.is_empty());
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod link;
pub mod observability;
pub mod protocol;
pub mod retry;
pub mod sensor;
pub mod session;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::{BrokerError, NetworkError, NodeError, NodeResult, TimeSyncError};
pub use protocol::*;
pub use session::{ClockState, ConnectionState, SessionState};
pub use supervisor::{SessionSupervisor, TickOutcome};
