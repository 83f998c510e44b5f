//! Mock implementations for testing
//!
//! Provides mock link driver, indicator, time source, broker transport and
//! sensors so the whole cascade runs without radios, NTP servers or brokers.
//! Every mock is a cheap clone over shared state: hand one clone to the code
//! under test and keep another to inject faults and inspect calls.

use crate::config::NetworkCredential;
use crate::error::{BrokerError, NetworkError, TimeSyncError};
use crate::link::{BlinkPattern, Indicator, LinkDriver, LinkStatus};
use crate::clock::TimeSource;
use crate::sensor::SensorSource;
use crate::transport::{BrokerTransport, InboundMessage, SecureChannel};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub type PublishedMessage = (String, Vec<u8>);

/// Lock shared mock state, recovering from a panicked test thread
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct LinkInner {
    reachable: HashSet<String>,
    begin_errors: HashSet<String>,
    polls_to_associate: u32,
    current: Option<String>,
    polls_since_begin: u32,
    associated: bool,
    begin_history: Vec<String>,
    status_polls: u32,
}

/// Mock link driver with per-SSID reachability
#[derive(Debug, Clone)]
pub struct MockLinkDriver {
    inner: Arc<Mutex<LinkInner>>,
}

impl Default for MockLinkDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLinkDriver {
    /// No network reachable; associates on the first status poll once one is
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LinkInner {
                reachable: HashSet::new(),
                begin_errors: HashSet::new(),
                polls_to_associate: 1,
                current: None,
                polls_since_begin: 0,
                associated: false,
                begin_history: Vec::new(),
                status_polls: 0,
            })),
        }
    }

    pub fn with_reachable(self, ssid: &str) -> Self {
        self.set_reachable(ssid, true);
        self
    }

    /// Association requests for `ssid` fail at the driver
    pub fn with_begin_error(self, ssid: &str) -> Self {
        lock(&self.inner).begin_errors.insert(ssid.to_string());
        self
    }

    /// Status polls needed after `begin` before a reachable network associates
    pub fn with_polls_to_associate(self, polls: u32) -> Self {
        lock(&self.inner).polls_to_associate = polls.max(1);
        self
    }

    pub fn set_reachable(&self, ssid: &str, reachable: bool) {
        let mut inner = lock(&self.inner);
        if reachable {
            inner.reachable.insert(ssid.to_string());
        } else {
            inner.reachable.remove(ssid);
            if inner.current.as_deref() == Some(ssid) {
                inner.associated = false;
            }
        }
    }

    /// Simulate losing the association
    pub fn drop_link(&self) {
        let mut inner = lock(&self.inner);
        inner.associated = false;
        inner.current = None;
    }

    pub fn begin_history(&self) -> Vec<String> {
        lock(&self.inner).begin_history.clone()
    }

    pub fn status_polls(&self) -> u32 {
        lock(&self.inner).status_polls
    }

    pub fn associated_ssid(&self) -> Option<String> {
        let inner = lock(&self.inner);
        inner.current.clone().filter(|_| inner.associated)
    }
}

#[async_trait]
impl LinkDriver for MockLinkDriver {
    async fn begin(&self, credential: &NetworkCredential) -> Result<(), NetworkError> {
        let mut inner = lock(&self.inner);
        inner.begin_history.push(credential.ssid.clone());
        if inner.begin_errors.contains(&credential.ssid) {
            return Err(NetworkError::Driver(format!(
                "mock driver refused {}",
                credential.ssid
            )));
        }
        inner.current = Some(credential.ssid.clone());
        inner.polls_since_begin = 0;
        inner.associated = false;
        Ok(())
    }

    async fn status(&self) -> Result<LinkStatus, NetworkError> {
        let mut inner = lock(&self.inner);
        inner.status_polls += 1;

        let Some(current) = inner.current.clone() else {
            return Ok(LinkStatus::Idle);
        };
        if inner.associated {
            return Ok(LinkStatus::Associated);
        }
        if inner.reachable.contains(&current) {
            inner.polls_since_begin += 1;
            if inner.polls_since_begin >= inner.polls_to_associate {
                inner.associated = true;
                return Ok(LinkStatus::Associated);
            }
        }
        Ok(LinkStatus::Associating)
    }

    async fn disconnect(&self) -> Result<(), NetworkError> {
        self.drop_link();
        Ok(())
    }
}

/// Mock indicator recording every failure signal
#[derive(Debug, Clone, Default)]
pub struct MockIndicator {
    alerts: Arc<Mutex<Vec<BlinkPattern>>>,
}

impl MockIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert_count(&self) -> usize {
        lock(&self.alerts).len()
    }

    pub fn alerts(&self) -> Vec<BlinkPattern> {
        lock(&self.alerts).clone()
    }
}

#[async_trait]
impl Indicator for MockIndicator {
    async fn signal_failure(&self, pattern: BlinkPattern) {
        lock(&self.alerts).push(pattern);
    }
}

#[derive(Debug, Clone, Copy)]
enum TimeBehaviour {
    Answer(u64),
    Fail,
    Hang,
    FailThenAnswer { failures: u32, epoch_ms: u64 },
}

/// Mock time source: answers, fails, or never responds
#[derive(Debug, Clone)]
pub struct MockTimeSource {
    behaviour: Arc<Mutex<TimeBehaviour>>,
    queries: Arc<Mutex<u32>>,
}

impl MockTimeSource {
    fn with_behaviour(behaviour: TimeBehaviour) -> Self {
        Self {
            behaviour: Arc::new(Mutex::new(behaviour)),
            queries: Arc::new(Mutex::new(0)),
        }
    }

    pub fn ok(epoch_ms: u64) -> Self {
        Self::with_behaviour(TimeBehaviour::Answer(epoch_ms))
    }

    /// Every query fails immediately
    pub fn failing() -> Self {
        Self::with_behaviour(TimeBehaviour::Fail)
    }

    /// Every query waits forever
    pub fn hanging() -> Self {
        Self::with_behaviour(TimeBehaviour::Hang)
    }

    pub fn failing_then_ok(failures: u32, epoch_ms: u64) -> Self {
        Self::with_behaviour(TimeBehaviour::FailThenAnswer { failures, epoch_ms })
    }

    pub fn set_answer(&self, epoch_ms: u64) {
        *lock(&self.behaviour) = TimeBehaviour::Answer(epoch_ms);
    }

    pub fn query_count(&self) -> u32 {
        *lock(&self.queries)
    }
}

#[async_trait]
impl TimeSource for MockTimeSource {
    async fn query(&self) -> Result<u64, TimeSyncError> {
        *lock(&self.queries) += 1;

        let behaviour = {
            let mut behaviour = lock(&self.behaviour);
            let current = *behaviour;
            if let TimeBehaviour::FailThenAnswer { failures, epoch_ms } = current {
                *behaviour = if failures <= 1 {
                    TimeBehaviour::Answer(epoch_ms)
                } else {
                    TimeBehaviour::FailThenAnswer {
                        failures: failures - 1,
                        epoch_ms,
                    }
                };
            }
            current
        };

        match behaviour {
            TimeBehaviour::Answer(epoch_ms) => Ok(epoch_ms),
            TimeBehaviour::Fail | TimeBehaviour::FailThenAnswer { .. } => Err(
                TimeSyncError::QueryFailed("mock time source unavailable".to_string()),
            ),
            TimeBehaviour::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug)]
struct BrokerInner {
    reachable: bool,
    refuse_remaining: u32,
    connected: bool,
    connect_attempts: u32,
    client_ids: Vec<String>,
    subscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
    inbound: VecDeque<InboundMessage>,
    fail_publish: bool,
    fail_subscribe: bool,
    fail_disconnect: bool,
}

/// Mock broker transport with fault injection
#[derive(Debug, Clone)]
pub struct MockBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBroker {
    /// Reachable broker accepting every connect
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BrokerInner {
                reachable: true,
                refuse_remaining: 0,
                connected: false,
                connect_attempts: 0,
                client_ids: Vec::new(),
                subscriptions: Vec::new(),
                published: Vec::new(),
                inbound: VecDeque::new(),
                fail_publish: false,
                fail_subscribe: false,
                fail_disconnect: false,
            })),
        }
    }

    pub fn unreachable(self) -> Self {
        self.set_reachable(false);
        self
    }

    /// Refuse the first `attempts` connects, then accept
    pub fn refusing_first(self, attempts: u32) -> Self {
        lock(&self.inner).refuse_remaining = attempts;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.inner).reachable = reachable;
    }

    /// Simulate the transport dropping underneath the session
    pub fn drop_connection(&self) {
        lock(&self.inner).connected = false;
    }

    pub fn push_inbound(&self, topic: &str, payload: &[u8]) {
        lock(&self.inner)
            .inbound
            .push_back(InboundMessage::new(topic, payload));
    }

    pub fn fail_publish(&self, fail: bool) {
        lock(&self.inner).fail_publish = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        lock(&self.inner).fail_subscribe = fail;
    }

    /// Disconnect still drops the connection but reports an error
    pub fn fail_disconnect(&self, fail: bool) {
        lock(&self.inner).fail_disconnect = fail;
    }

    pub fn connect_attempts(&self) -> u32 {
        lock(&self.inner).connect_attempts
    }

    pub fn client_ids(&self) -> Vec<String> {
        lock(&self.inner).client_ids.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner).subscriptions.clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.inner).published.clone()
    }
}

#[async_trait]
impl BrokerTransport for MockBroker {
    async fn connect(
        &mut self,
        _channel: &SecureChannel,
        client_id: &str,
    ) -> Result<(), BrokerError> {
        let mut inner = lock(&self.inner);
        inner.connect_attempts += 1;
        if !inner.reachable {
            return Err(BrokerError::ConnectFailed("mock broker unreachable".to_string()));
        }
        if inner.refuse_remaining > 0 {
            inner.refuse_remaining -= 1;
            return Err(BrokerError::ConnectFailed("mock broker refused".to_string()));
        }
        inner.connected = true;
        inner.client_ids.push(client_id.to_string());
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(BrokerError::NotConnected);
        }
        if inner.fail_subscribe {
            return Err(BrokerError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "mock broker rejected subscription".to_string(),
            });
        }
        inner.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(BrokerError::NotConnected);
        }
        if inner.fail_publish {
            return Err(BrokerError::PublishFailed("mock publish failure".to_string()));
        }
        inner.published.push((topic.to_string(), payload));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Vec<InboundMessage>, BrokerError> {
        let mut inner = lock(&self.inner);
        if !inner.connected {
            return Err(BrokerError::TransportDropped(
                "mock connection dropped".to_string(),
            ));
        }
        Ok(inner.inbound.drain(..).collect())
    }

    fn is_connected(&self) -> bool {
        lock(&self.inner).connected
    }

    async fn disconnect(&mut self) -> Result<(), BrokerError> {
        let mut inner = lock(&self.inner);
        inner.connected = false;
        if inner.fail_disconnect {
            return Err(BrokerError::TransportDropped(
                "mock disconnect failure".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fixed sensor readings
#[derive(Debug, Clone, Copy)]
pub struct MockSensors {
    air_temp_c: Option<f32>,
    air_humidity_pct: Option<f32>,
    soil_moisture_pct: Option<f32>,
    soil_temp_c: Option<f32>,
}

impl MockSensors {
    pub fn new(
        air_temp_c: Option<f32>,
        air_humidity_pct: Option<f32>,
        soil_moisture_pct: Option<f32>,
        soil_temp_c: Option<f32>,
    ) -> Self {
        Self {
            air_temp_c,
            air_humidity_pct,
            soil_moisture_pct,
            soil_temp_c,
        }
    }
}

impl SensorSource for MockSensors {
    fn air_temperature_c(&mut self) -> Option<f32> {
        self.air_temp_c
    }

    fn air_humidity_pct(&mut self) -> Option<f32> {
        self.air_humidity_pct
    }

    fn soil_moisture_pct(&mut self) -> Option<f32> {
        self.soil_moisture_pct
    }

    fn soil_temperature_c(&mut self) -> Option<f32> {
        self.soil_temp_c
    }
}
