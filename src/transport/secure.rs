//! Mutually authenticated session configuration
//!
//! Configuration is cheap and has no retry of its own: the TLS handshake
//! happens inside every broker connect attempt, so handshake failures land in
//! the broker connect retry loop.

use crate::config::{BrokerSection, ConfigError, TrustBundle};
use crate::error::{NetworkError, NodeError};
use crate::session::{ConnectionState, SessionState};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Everything a transport needs to open the encrypted broker connection
#[derive(Debug, Clone, PartialEq)]
pub struct SecureChannel {
    pub host: String,
    pub port: u16,
    pub trust: TrustBundle,
    pub keep_alive: Duration,
}

pub struct SecureSession {
    endpoint: String,
    port: u16,
    keep_alive: Duration,
    channel: Option<SecureChannel>,
}

impl SecureSession {
    pub fn new(settings: &BrokerSection) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            port: settings.port,
            keep_alive: settings.keep_alive(),
            channel: None,
        }
    }

    /// Check preconditions and build the channel
    ///
    /// Fails with `NotAssociated` when the link is down and with
    /// `MissingEndpoint` when no broker endpoint is configured, before any
    /// network activity.
    pub fn configure(
        &mut self,
        trust: &TrustBundle,
        state: &mut SessionState,
    ) -> Result<&SecureChannel, NodeError> {
        if !state.connection().is_associated() {
            return Err(NetworkError::NotAssociated.into());
        }

        let host = resolve_host(&self.endpoint)?;
        trust.validate()?;

        state.transition(ConnectionState::SecureHandshaking);
        debug!(host = %host, port = self.port, "Configuring secure session");

        let channel = self.channel.insert(SecureChannel {
            host,
            port: self.port,
            trust: trust.clone(),
            keep_alive: self.keep_alive,
        });

        state.transition(ConnectionState::SecureReady);
        info!(host = %channel.host, port = channel.port, "Secure session configured");
        Ok(channel)
    }

    /// Channel from the last successful configure
    pub fn channel(&self) -> Option<&SecureChannel> {
        self.channel.as_ref()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Host name from a bare endpoint (`host`) or a URL (`mqtts://host:port`)
fn resolve_host(endpoint: &str) -> Result<String, ConfigError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(ConfigError::MissingEndpoint);
    }

    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("mqtts://{endpoint}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| ConfigError::InvalidConfig(format!("broker endpoint '{endpoint}': {e}")))?;

    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigError::InvalidConfig(format!("broker endpoint '{endpoint}' has no host")))
}
