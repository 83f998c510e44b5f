//! Pure MQTT connection configuration
//!
//! Builds rumqttc options for one connect attempt from a [`SecureChannel`].

use crate::transport::SecureChannel;
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport};

/// Largest packet accepted from or sent to the broker
pub const MAX_PACKET_SIZE: u32 = 128 * 1024;

/// Capacity of the request channel between client handle and event loop
pub const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// ALPN protocol for MQTT over TLS on port 443 style endpoints
const MQTT_ALPN: &[u8] = b"x-amzn-mqtt-ca";

/// Mutual TLS transport from the trust bundle (pure function)
pub fn tls_transport(channel: &SecureChannel) -> Transport {
    let alpn = (channel.port == 443).then(|| vec![MQTT_ALPN.to_vec()]);
    Transport::tls_with_config(TlsConfiguration::Simple {
        ca: channel.trust.ca_cert.clone(),
        alpn,
        client_auth: Some((
            channel.trust.client_cert.clone(),
            channel.trust.client_key.clone(),
        )),
    })
}

/// Configure MQTT options for one connect attempt (pure function)
///
/// The client id is the thing name; brokers that bind certificates to
/// things reject any other id.
pub fn configure_mqtt_options(client_id: &str, channel: &SecureChannel) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(client_id, channel.host.as_str(), channel.port);
    mqtt_options.set_transport(tls_transport(channel));
    mqtt_options.set_keep_alive(channel.keep_alive);
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));
    mqtt_options
}
