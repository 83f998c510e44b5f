//! Error taxonomy for the sensor node connectivity core
//!
//! Every layer of the reconnect cascade has its own error type. None of them
//! terminates the process: configuration errors abort the affected stage for
//! the current tick, everything else is recovered by retry or fallback.

use thiserror::Error;

pub use crate::config::ConfigError;
pub use crate::protocol::ParseError;

/// Lower-layer network association errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("No network credentials configured")]
    NoCredentials,

    #[error("Association with '{ssid}' timed out after {polls} status polls")]
    AssociationTimeout { ssid: String, polls: u32 },

    #[error("Link driver error: {0}")]
    Driver(String),

    #[error("Network link is not associated")]
    NotAssociated,
}

/// Wall-clock synchronisation errors (never fatal)
#[derive(Debug, Error)]
pub enum TimeSyncError {
    #[error("Time query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid time response: {0}")]
    InvalidResponse(String),

    #[error("Time sync did not complete within {waited_ms}ms")]
    Timeout { waited_ms: u64 },
}

/// Broker session errors
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker connect timed out after {waited_ms}ms ({attempts} attempts)")]
    ConnectTimeout { waited_ms: u64, attempts: u32 },

    #[error("Broker connect attempt failed: {0}")]
    ConnectFailed(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Publishing failed: {0}")]
    PublishFailed(String),

    #[error("Subscription to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    #[error("Serialization error")]
    Serialization(#[source] serde_json::Error),

    #[error("Payload of {size} bytes exceeds broker limit of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Broker transport dropped: {0}")]
    TransportDropped(String),
}

/// Unified error for a cascade stage or host-loop operation
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Time sync error: {0}")]
    TimeSync(#[from] TimeSyncError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl NodeError {
    /// Short stable label for structured log fields
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::Config(_) => "config",
            NodeError::Network(_) => "network",
            NodeError::TimeSync(_) => "time_sync",
            NodeError::Broker(BrokerError::ConnectTimeout { .. }) => "broker_connect_timeout",
            NodeError::Broker(BrokerError::PublishFailed(_)) => "broker_publish_failed",
            NodeError::Broker(_) => "broker",
            NodeError::Parse(_) => "parse",
        }
    }
}

/// Redact a known secret from driver or library output and cap its length
pub(crate) fn sanitize_output(output: &str, secret: &str) -> String {
    let mut sanitized = if secret.is_empty() {
        output.to_string()
    } else {
        output.replace(secret, "***")
    };

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let mut cut = 500 - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
