//! Session supervisor recovery tests
//!
//! Drives the full cascade (link, clock, secure session, broker session)
//! over mocks, injecting faults at each stage.


use std::time::Duration;
use terranode::config::ConfigError;
use terranode::error::{BrokerError, NetworkError, NodeError};
use terranode::protocol::TelemetrySample;
use terranode::session::ConnectionState;
use terranode::supervisor::{SupervisorMode, TickOutcome};
use terranode::testing::mocks::{MockBroker, MockLinkDriver, MockTimeSource};
use test_helpers::{harness, reachable_harness, SYNCED_EPOCH_MS};

const COMMAND_TOPIC: &str = "esp32/commands/verde-terra/dev1";

fn sample(timestamp_ms: u64) -> TelemetrySample {
    TelemetrySample {
        device_id: "dev1".to_string(),
        timestamp_ms,
        air_temp_c: Some(21.5),
        air_humidity_pct: Some(55.0),
        soil_moisture_pct: Some(40.0),
        soil_temp_c: Some(18.2),
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_runs_full_cascade() {
    let mut h = reachable_harness();
    assert_eq!(h.supervisor.mode(), SupervisorMode::Recovering);

    let outcome = h.supervisor.tick().await;

    assert!(matches!(outcome, TickOutcome::Reconnected));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);
    assert_eq!(h.supervisor.mode(), SupervisorMode::Healthy);
    assert!(h.supervisor.state().clock().sync_valid());
    assert!(h.supervisor.timestamp_ms() >= SYNCED_EPOCH_MS);
    assert_eq!(h.time.query_count(), 1);
    assert_eq!(h.broker.subscriptions(), vec![COMMAND_TOPIC.to_string()]);
    assert_eq!(h.supervisor.reconnect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_tick_pumps_when_session_alive() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    let outcome = h.supervisor.tick().await;

    assert!(matches!(outcome, TickOutcome::Pumped { delivered: 0 }));
    assert_eq!(h.broker.connect_attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transport_drop_detected_and_next_tick_recovers() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    h.broker.drop_connection();
    assert!(!h.supervisor.pubsub().is_connected());

    let outcome = h.supervisor.tick().await;

    assert!(matches!(outcome, TickOutcome::Reconnected));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);
    assert_eq!(h.supervisor.reconnect_count(), 1);
    assert_eq!(h.broker.client_ids(), vec!["dev1".to_string(), "dev1".to_string()]);
    // Link stayed up, so neither the link nor the clock was redone
    assert_eq!(h.driver.begin_history(), vec!["A".to_string()]);
    assert_eq!(h.time.query_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_reruns_link_and_clock() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    h.driver.drop_link();
    h.broker.drop_connection();
    h.time.set_answer(SYNCED_EPOCH_MS + 60_000);

    assert!(matches!(h.supervisor.tick().await, TickOutcome::Reconnected));
    assert_eq!(h.driver.begin_history().len(), 2);
    assert_eq!(h.time.query_count(), 2);
    assert_eq!(
        h.supervisor.state().clock().last_synced_epoch_ms(),
        SYNCED_EPOCH_MS + 60_000
    );
}

#[tokio::test(start_paused = true)]
async fn test_malformed_inbound_leaves_state_unchanged() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    h.broker.push_inbound(COMMAND_TOPIC, b"\xff\xfe not json {");
    let outcome = h.supervisor.tick().await;

    assert!(matches!(outcome, TickOutcome::Pumped { delivered: 1 }));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);

    h.supervisor.on_message(COMMAND_TOPIC, b"}{");
    h.supervisor.on_message(COMMAND_TOPIC, b"");
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);
    assert!(h.supervisor.pubsub().is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_empty_endpoint_aborts_before_broker() {
    let mut h = harness(
        MockLinkDriver::new().with_reachable("A"),
        MockTimeSource::ok(SYNCED_EPOCH_MS),
        MockBroker::new(),
        "",
    );

    let outcome = h.supervisor.tick().await;

    assert!(matches!(
        outcome,
        TickOutcome::RecoveryAborted(NodeError::Config(ConfigError::MissingEndpoint))
    ));
    assert_eq!(h.broker.connect_attempts(), 0);
    assert_eq!(h.supervisor.mode(), SupervisorMode::Recovering);

    // Reported again on every cascade
    assert!(matches!(
        h.supervisor.tick().await,
        TickOutcome::RecoveryAborted(NodeError::Config(ConfigError::MissingEndpoint))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_broker_timeout_retried_on_next_tick() {
    let broker = MockBroker::new().unreachable();
    let mut h = harness(
        MockLinkDriver::new().with_reachable("A"),
        MockTimeSource::ok(SYNCED_EPOCH_MS),
        broker.clone(),
        "broker.example.com",
    );

    let start = tokio::time::Instant::now();
    let outcome = h.supervisor.tick().await;
    assert!(matches!(
        outcome,
        TickOutcome::RecoveryAborted(NodeError::Broker(BrokerError::ConnectTimeout { .. }))
    ));
    assert!(start.elapsed() <= Duration::from_secs(62));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::Disconnected);

    broker.set_reachable(true);
    assert!(matches!(h.supervisor.tick().await, TickOutcome::Reconnected));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);
}

#[tokio::test(start_paused = true)]
async fn test_clock_failure_is_not_fatal() {
    let mut h = harness(
        MockLinkDriver::new().with_reachable("A"),
        MockTimeSource::failing(),
        MockBroker::new(),
        "broker.example.com",
    );

    let outcome = h.supervisor.tick().await;

    assert!(matches!(outcome, TickOutcome::Reconnected));
    assert!(!h.supervisor.state().clock().sync_valid());
    assert_eq!(h.supervisor.timestamp_ms(), 0);
    assert!(h.supervisor.health().is_healthy);
    assert!(!h.supervisor.health().clock_synced);
}

#[tokio::test(start_paused = true)]
async fn test_publish_after_recovery() {
    let mut h = reachable_harness();

    assert!(matches!(
        h.supervisor.publish(&sample(1000)).await,
        Err(BrokerError::NotConnected)
    ));

    h.supervisor.tick().await;
    h.supervisor.publish(&sample(1000)).await.unwrap();

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "esp32/data/verde-terra/dev1");
}

#[tokio::test(start_paused = true)]
async fn test_publish_failure_keeps_session() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    h.broker.fail_publish(true);
    assert!(matches!(
        h.supervisor.publish(&sample(1000)).await,
        Err(BrokerError::PublishFailed(_))
    ));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);
    assert!(h.broker.published().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_reflects_mode() {
    let mut h = reachable_harness();
    assert!(!h.supervisor.health().is_healthy);

    h.supervisor.tick().await;
    let health = h.supervisor.health();
    assert!(health.is_healthy);
    assert_eq!(health.mode, SupervisorMode::Healthy);
    assert_eq!(health.state, ConnectionState::BrokerReady);
    assert!(health.clock_synced);

    h.broker.drop_connection();
    h.broker.set_reachable(false);
    let outcome = h.supervisor.tick().await;
    assert!(matches!(outcome, TickOutcome::RecoveryAborted(_)));
    assert!(!h.supervisor.health().is_healthy);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_command_topic_stays_healthy() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    h.broker.push_inbound(COMMAND_TOPIC, br#"{"message":"hi"}"#);
    assert!(matches!(
        h.supervisor.tick().await,
        TickOutcome::Pumped { delivered: 1 }
    ));

    tokio::time::advance(Duration::from_secs(3601)).await;
    assert!(matches!(
        h.supervisor.tick().await,
        TickOutcome::Pumped { delivered: 0 }
    ));

    let health = h.supervisor.health();
    assert_eq!(health.mode, SupervisorMode::Healthy);
    assert_eq!(health.state, ConnectionState::BrokerReady);
    assert!(health.is_healthy, "connected session must be healthy");
    assert!(health.time_since_last_message >= Some(Duration::from_secs(3601)));
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_failure_aborts_and_next_tick_recovers() {
    let mut h = reachable_harness();
    h.broker.fail_subscribe(true);

    let outcome = h.supervisor.tick().await;

    assert!(matches!(
        outcome,
        TickOutcome::RecoveryAborted(NodeError::Broker(BrokerError::SubscribeFailed { .. }))
    ));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::Disconnected);
    assert!(!h.supervisor.pubsub().is_connected());
    assert!(h.broker.subscriptions().is_empty());

    h.broker.fail_subscribe(false);
    assert!(matches!(h.supervisor.tick().await, TickOutcome::Reconnected));
    assert_eq!(h.supervisor.state().connection(), ConnectionState::BrokerReady);
    assert_eq!(h.broker.subscriptions(), vec![COMMAND_TOPIC.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects_broker() {
    let mut h = reachable_harness();
    h.supervisor.tick().await;

    h.supervisor.shutdown().await.unwrap();

    assert!(!h.supervisor.pubsub().is_connected());
    assert_eq!(h.supervisor.mode(), SupervisorMode::Recovering);
    assert_eq!(h.driver.associated_ssid(), Some("A".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_no_reachable_network_blocks_the_tick() {
    let mut h = harness(
        MockLinkDriver::new(),
        MockTimeSource::ok(SYNCED_EPOCH_MS),
        MockBroker::new(),
        "broker.example.com",
    );

    let result = tokio::time::timeout(Duration::from_secs(120), h.supervisor.tick()).await;

    assert!(result.is_err());
    assert_eq!(h.broker.connect_attempts(), 0);
    assert!(h.indicator.alert_count() >= 2);
}

#[test]
fn test_network_error_is_recoverable_kind() {
    let error: NodeError = NetworkError::NotAssociated.into();
    assert_eq!(error.kind(), "network");
}
