//! Node configuration loaded from TOML
//!
//! Everything the node needs is fixed at deploy time: device identity,
//! ordered network credentials, the broker endpoint and trust bundle, and the
//! retry tunables of each cascade stage. There is no runtime reconfiguration.

use crate::protocol::{validate_thing_name, DeviceIdentity, ValidationError};
use crate::retry::{RetryLimit, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Main node configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub device: DeviceSection,
    /// Ordered candidates; order defines fallback priority
    #[serde(rename = "network", default)]
    pub networks: Vec<NetworkEntry>,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub clock: ClockSection,
    pub broker: BrokerSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Device identity section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Thing name (must match [a-zA-Z0-9._-]+)
    pub thing_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_project")]
    pub project: String,
}

fn default_namespace() -> String {
    "esp32".to_string()
}

fn default_project() -> String {
    "verde-terra".to_string()
}

/// One `[[network]]` entry as written in the file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkEntry {
    pub ssid: String,
    /// Literal secret
    pub secret: Option<String>,
    /// Environment variable containing the secret (takes precedence)
    pub secret_env: Option<String>,
}

/// Resolved network credential
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkCredential {
    pub ssid: String,
    pub secret: String,
}

impl NetworkCredential {
    pub fn new(ssid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for NetworkCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkCredential")
            .field("ssid", &self.ssid)
            .field("secret", &"***")
            .finish()
    }
}

/// Which link driver runs the lower network layer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkDriverKind {
    /// NetworkManager wireless station association
    #[default]
    Nmcli,
    /// Link is managed outside the node (wired, or pre-associated)
    Static,
}

/// What the credential cursor does after the last candidate fails
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CursorPolicy {
    /// Stay on the last candidate
    #[default]
    Saturate,
    /// Go back to the first candidate
    Wrap,
}

/// Network link section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    #[serde(default)]
    pub driver: LinkDriverKind,
    /// Wireless interface for the nmcli driver (any wifi device if unset)
    pub interface: Option<String>,
    #[serde(default = "default_link_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_attempts_per_candidate")]
    pub attempts_per_candidate: u32,
    /// Extra wait after every candidate has failed once
    #[serde(default = "default_exhausted_backoff")]
    pub exhausted_backoff_ms: u64,
    #[serde(default)]
    pub cursor_policy: CursorPolicy,
}

fn default_link_poll_interval() -> u64 {
    500
}

fn default_attempts_per_candidate() -> u32 {
    40 // 40 * 500ms = 20 seconds per candidate
}

fn default_exhausted_backoff() -> u64 {
    5000
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            driver: LinkDriverKind::default(),
            interface: None,
            poll_interval_ms: default_link_poll_interval(),
            attempts_per_candidate: default_attempts_per_candidate(),
            exhausted_backoff_ms: default_exhausted_backoff(),
            cursor_policy: CursorPolicy::default(),
        }
    }
}

impl LinkSection {
    /// Status polling policy for one candidate
    pub fn candidate_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(self.poll_interval_ms),
            RetryLimit::Attempts(self.attempts_per_candidate),
        )
    }
}

/// Clock sync section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClockSection {
    /// SNTP server as host:port
    #[serde(default = "default_time_server")]
    pub server: String,
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_ms: u64,
    #[serde(default = "default_clock_poll_interval")]
    pub poll_interval_ms: u64,
    /// Highest stratum accepted from a server
    #[serde(default = "default_max_stratum")]
    pub max_stratum: u8,
}

fn default_time_server() -> String {
    "pool.ntp.org:123".to_string()
}

fn default_sync_timeout() -> u64 {
    120_000 // 2 minutes
}

fn default_clock_poll_interval() -> u64 {
    1000
}

fn default_max_stratum() -> u8 {
    15
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            server: default_time_server(),
            sync_timeout_ms: default_sync_timeout(),
            poll_interval_ms: default_clock_poll_interval(),
            max_stratum: default_max_stratum(),
        }
    }
}

impl ClockSection {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker host name; checked per connection attempt, not at load
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,
    #[serde(default = "default_client_cert")]
    pub client_cert: PathBuf,
    #[serde(default = "default_client_key")]
    pub client_key: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,
}

fn default_broker_port() -> u16 {
    8883
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from("certs/AmazonRootCA1.pem")
}

fn default_client_cert() -> PathBuf {
    PathBuf::from("certs/device.pem.crt")
}

fn default_client_key() -> PathBuf {
    PathBuf::from("certs/private.pem.key")
}

fn default_connect_timeout() -> u64 {
    60_000
}

fn default_retry_interval() -> u64 {
    1000
}

fn default_keep_alive() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    5000
}

fn default_inbound_queue_capacity() -> usize {
    32
}

impl BrokerSection {
    /// Section with defaults for everything but the endpoint and bundle paths
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: default_broker_port(),
            ca_cert: default_ca_cert(),
            client_cert: default_client_cert(),
            client_key: default_client_key(),
            connect_timeout_ms: default_connect_timeout(),
            retry_interval_ms: default_retry_interval(),
            keep_alive_secs: default_keep_alive(),
            write_timeout_ms: default_write_timeout(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
        }
    }

    /// Broker connect retry policy
    pub fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(
            Duration::from_millis(self.retry_interval_ms),
            RetryLimit::Elapsed(Duration::from_millis(self.connect_timeout_ms)),
        )
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    /// Read the PEM files of the trust bundle
    pub fn load_trust_bundle(&self) -> Result<TrustBundle, ConfigError> {
        let bundle = TrustBundle {
            ca_cert: std::fs::read(&self.ca_cert)?,
            client_cert: std::fs::read(&self.client_cert)?,
            client_key: std::fs::read(&self.client_key)?,
        };
        bundle.validate()?;
        Ok(bundle)
    }
}

/// CA certificate, client certificate and client key, fixed for the process lifetime
#[derive(Clone, PartialEq, Eq)]
pub struct TrustBundle {
    pub ca_cert: Vec<u8>,
    pub client_cert: Vec<u8>,
    pub client_key: Vec<u8>,
}

impl TrustBundle {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let parts = [
            ("ca_cert", &self.ca_cert),
            ("client_cert", &self.client_cert),
            ("client_key", &self.client_key),
        ];
        for (name, bytes) in parts {
            if bytes.iter().all(|b| b.is_ascii_whitespace()) {
                return Err(ConfigError::EmptyTrustBundle(name.to_string()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("ca_cert", &format!("{} bytes", self.ca_cert.len()))
            .field("client_cert", &format!("{} bytes", self.client_cert.len()))
            .field("client_key", &"***")
            .finish()
    }
}

/// Host loop cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    #[serde(default = "default_publish_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

fn default_publish_interval() -> u64 {
    60
}

fn default_tick_interval() -> u64 {
    100
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            interval_secs: default_publish_interval(),
            tick_interval_ms: default_tick_interval(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid thing name: {0}")]
    InvalidThingName(#[from] ValidationError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Broker endpoint is not configured")]
    MissingEndpoint,
    #[error("Trust bundle part '{0}' is empty")]
    EmptyTrustBundle(String),
}

impl NodeConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        validate_thing_name(&self.device.thing_name)?;
        self.identity()?;

        if self.networks.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[network]] entry is required".to_string(),
            ));
        }
        self.credentials()?;

        if self.link.poll_interval_ms == 0 || self.link.attempts_per_candidate == 0 {
            return Err(ConfigError::InvalidConfig(
                "link poll_interval_ms and attempts_per_candidate must be greater than 0"
                    .to_string(),
            ));
        }
        if self.clock.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "clock poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.broker.retry_interval_ms == 0 || self.broker.inbound_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker retry_interval_ms and inbound_queue_capacity must be greater than 0"
                    .to_string(),
            ));
        }
        if self.telemetry.interval_secs == 0 || self.telemetry.tick_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "telemetry intervals must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Device identity with derived topics
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        Ok(DeviceIdentity::derive(
            &self.device.namespace,
            &self.device.project,
            &self.device.thing_name,
        )?)
    }

    /// Resolve the ordered credential list, reading secrets from the environment
    pub fn credentials(&self) -> Result<Vec<NetworkCredential>, ConfigError> {
        self.networks
            .iter()
            .map(|entry| {
                if entry.ssid.is_empty() {
                    return Err(ConfigError::InvalidConfig(
                        "network ssid cannot be empty".to_string(),
                    ));
                }
                let secret = match (&entry.secret_env, &entry.secret) {
                    (Some(env_name), _) => Self::get_env_var_required(env_name)?,
                    (None, Some(secret)) => secret.clone(),
                    (None, None) => String::new(),
                };
                Ok(NetworkCredential::new(entry.ssid.clone(), secret))
            })
            .collect()
    }

    /// Load the broker trust bundle from disk
    pub fn trust_bundle(&self) -> Result<TrustBundle, ConfigError> {
        self.broker.load_trust_bundle()
    }

    /// Copy of the configuration that is safe to print
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for entry in &mut copy.networks {
            if entry.secret.is_some() {
                entry.secret = Some("***".to_string());
            }
        }
        copy
    }

    /// Helper method to get environment variable with error propagation
    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
thing_name = "test-node"

[[network]]
ssid = "A"
secret = "x"

[[network]]
ssid = "B"
secret = "y"

[broker]
endpoint = "broker.example.com"
ca_cert = "certs/ca.pem"
client_cert = "certs/client.pem.crt"
client_key = "certs/client.pem.key"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let config = NodeConfig::test_config();
        assert!(config.validate().is_ok());

        assert_eq!(config.device.namespace, "esp32");
        assert_eq!(config.device.project, "verde-terra");
        assert_eq!(config.link.driver, LinkDriverKind::Nmcli);
        assert_eq!(config.link.poll_interval_ms, 500);
        assert_eq!(config.link.attempts_per_candidate, 40);
        assert_eq!(config.link.exhausted_backoff_ms, 5000);
        assert_eq!(config.link.cursor_policy, CursorPolicy::Saturate);
        assert_eq!(config.clock.server, "pool.ntp.org:123");
        assert_eq!(config.clock.sync_timeout_ms, 120_000);
        assert_eq!(config.broker.port, 8883);
        assert_eq!(config.broker.connect_timeout_ms, 60_000);
        assert_eq!(config.broker.retry_interval_ms, 1000);
        assert_eq!(config.telemetry.interval_secs, 60);
    }

    #[test]
    fn test_credentials_keep_order() {
        let config = NodeConfig::test_config();
        let credentials = config.credentials().unwrap();
        assert_eq!(
            credentials,
            vec![NetworkCredential::new("A", "x"), NetworkCredential::new("B", "y")]
        );
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = NetworkCredential::new("greenhouse", "hunter22");
        let debug = format!("{credential:?}");
        assert!(debug.contains("greenhouse"));
        assert!(!debug.contains("hunter22"));
    }

    #[test]
    fn test_missing_secret_env_fails() {
        let mut config = NodeConfig::test_config();
        config.networks[0].secret_env = Some("TERRANODE_TEST_UNSET_SECRET_VAR".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "TERRANODE_TEST_UNSET_SECRET_VAR"
        ));
    }

    #[test]
    fn test_empty_endpoint_allowed_at_load() {
        let mut config = NodeConfig::test_config();
        config.broker.endpoint = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policies_from_sections() {
        let config = NodeConfig::test_config();
        assert_eq!(
            config.link.candidate_policy().calculate_max_total_time(),
            Some(19_500)
        );
        assert_eq!(
            config.broker.connect_policy().limit,
            RetryLimit::Elapsed(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_trust_bundle_validation() {
        let bundle = TrustBundle {
            ca_cert: b"-----BEGIN CERTIFICATE-----".to_vec(),
            client_cert: b"-----BEGIN CERTIFICATE-----".to_vec(),
            client_key: b"  \n".to_vec(),
        };
        assert!(matches!(
            bundle.validate(),
            Err(ConfigError::EmptyTrustBundle(part)) if part == "client_key"
        ));

        let debug = format!("{bundle:?}");
        assert!(debug.contains("client_key: \"***\""));
    }

    #[test]
    fn test_redacted_hides_literal_secrets() {
        let config = NodeConfig::test_config().redacted();
        assert_eq!(config.networks[0].secret.as_deref(), Some("***"));
        assert_eq!(config.networks[1].secret.as_deref(), Some("***"));
    }
}
