//! Published telemetry payloads parse back to the sample that was published


use proptest::prelude::*;
use serde_json::Value;
use std::time::Duration;
use terranode::config::BrokerSection;
use terranode::protocol::TelemetrySample;
use terranode::session::{ConnectionState, SessionState};
use terranode::testing::mocks::MockBroker;
use terranode::transport::{PubSubSession, SecureChannel};

const TOLERANCE: f32 = 1e-3;

fn channel() -> SecureChannel {
    SecureChannel {
        host: "broker.example.com".to_string(),
        port: 8883,
        trust: test_helpers::trust_bundle(),
        keep_alive: Duration::from_secs(60),
    }
}

/// Publish one sample through a connected session and return the raw payload
async fn publish_and_capture(sample: &TelemetrySample) -> Vec<u8> {
    let broker = MockBroker::new();
    let settings = BrokerSection::new("broker.example.com");
    let mut session = PubSubSession::new(broker.clone(), test_helpers::identity(), &settings);
    let mut state = SessionState::new();
    state.transition(ConnectionState::SecureReady);

    session.connect(&channel(), &mut state).await.unwrap();
    session.publish(sample).await.unwrap();

    let mut published = broker.published();
    assert_eq!(published.len(), 1);
    published.remove(0).1
}

fn assert_close(actual: Option<f32>, expected: Option<f32>) {
    match (actual, expected) {
        (Some(a), Some(e)) => assert!((a - e).abs() <= TOLERANCE, "{a} != {e}"),
        (None, None) => {}
        _ => panic!("reading mismatch: {actual:?} vs {expected:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_dev1_sample_round_trips() {
    let sample = TelemetrySample {
        device_id: "dev1".to_string(),
        timestamp_ms: 1000,
        air_temp_c: Some(21.5),
        air_humidity_pct: Some(55.0),
        soil_moisture_pct: Some(40.0),
        soil_temp_c: Some(18.2),
    };

    let payload = publish_and_capture(&sample).await;

    let document: Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(document["device_id"], "dev1");
    assert_eq!(document["timestamp_ms"], 1000);
    let field = |name: &str| document[name].as_f64().unwrap() as f32;
    assert!((field("air_temp_c") - 21.5).abs() <= TOLERANCE);
    assert!((field("air_humidity_pct") - 55.0).abs() <= TOLERANCE);
    assert!((field("soil_moisture_pct") - 40.0).abs() <= TOLERANCE);
    assert!((field("soil_temp_c") - 18.2).abs() <= TOLERANCE);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_reading_published_as_null() {
    let sample = TelemetrySample {
        device_id: "dev1".to_string(),
        timestamp_ms: 0,
        air_temp_c: None,
        air_humidity_pct: Some(55.0),
        soil_moisture_pct: Some(40.0),
        soil_temp_c: None,
    };

    let payload = publish_and_capture(&sample).await;

    let document: Value = serde_json::from_slice(&payload).unwrap();
    assert!(document["air_temp_c"].is_null());
    assert!(document["soil_temp_c"].is_null());
    assert_eq!(TelemetrySample::from_payload(&payload).unwrap(), sample);
}

fn reading() -> impl Strategy<Value = Option<f32>> {
    prop_oneof![
        9 => (-100.0f32..200.0).prop_map(Some),
        1 => Just(None),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_published_payload_round_trips(
        device_id in "[a-zA-Z0-9._-]{1,32}",
        timestamp_ms in any::<u64>(),
        air_temp_c in reading(),
        air_humidity_pct in reading(),
        soil_moisture_pct in reading(),
        soil_temp_c in reading(),
    ) {
        let sample = TelemetrySample {
            device_id,
            timestamp_ms,
            air_temp_c,
            air_humidity_pct,
            soil_moisture_pct,
            soil_temp_c,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        let payload = runtime.block_on(publish_and_capture(&sample));
        let parsed = TelemetrySample::from_payload(&payload).unwrap();

        prop_assert_eq!(&parsed.device_id, &sample.device_id);
        prop_assert_eq!(parsed.timestamp_ms, sample.timestamp_ms);
        assert_close(parsed.air_temp_c, sample.air_temp_c);
        assert_close(parsed.air_humidity_pct, sample.air_humidity_pct);
        assert_close(parsed.soil_moisture_pct, sample.soil_moisture_pct);
        assert_close(parsed.soil_temp_c, sample.soil_temp_c);
    }
}
