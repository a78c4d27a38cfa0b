#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use vtcbus::clock::{ManualClock, TimeSource, Timestamp};
use vtcbus::command::CommandHandler;
use vtcbus::config::{ConfigDocument, ConfigKey, DeviceConfig, MemoryConfigStore};
use vtcbus::context::{SharedContext, Topics};
use vtcbus::link::{BrokerLink, Inbound, LinkError};
use vtcbus::measurement::{MeasurementRecord, Tenths};
use vtcbus::publisher::{Publisher, ReconnectPolicy};

/// 2024-03-01 12:00:00
pub const T0: i64 = 1_709_294_400;

pub fn test_topics() -> Topics {
    Topics::new("vtc", "north", "press-1", "dev-1")
}

pub fn test_context(delivery_capacity: usize) -> Arc<SharedContext> {
    SharedContext::new(delivery_capacity, test_topics()).unwrap()
}

pub fn test_document() -> ConfigDocument {
    let mut document = ConfigDocument::default();
    document.set(ConfigKey::Ip, "10.0.0.20");
    document.set(ConfigKey::Dns, "10.0.0.1");
    document.set(ConfigKey::Gateway, "10.0.0.1");
    document.set(ConfigKey::Subnet, "255.255.255.0");
    document.set(ConfigKey::Mqtt, "10.0.0.5");
    document.set(ConfigKey::Ntp, "10.0.0.6");
    document.set(ConfigKey::Site, "north");
    document.set(ConfigKey::EquipmentId, "press-1");
    document.set(ConfigKey::ClientId, "dev-1");
    document.set(ConfigKey::VoltageThreshold, "125.5");
    document
}

pub fn test_config() -> DeviceConfig {
    DeviceConfig::from_document(&test_document(), "fallback")
}

pub fn record(counter: u32, volts: f32) -> MeasurementRecord {
    MeasurementRecord::new(
        Timestamp::new(T0, counter),
        Tenths::from_f32(volts),
        Tenths::from_f32(1.5),
    )
}

/// Broker stand-in driven entirely by the test.
#[derive(Debug, Default)]
pub struct ScriptedLink {
    pub connected: bool,
    pub failures_remaining: usize,
    pub connect_attempts: usize,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub inbound: VecDeque<Inbound>,
    pub flushed: Option<Duration>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(attempts: usize) -> Self {
        Self {
            failures_remaining: attempts,
            ..Self::default()
        }
    }

    pub fn queue_inbound(&mut self, topic: &str, payload: &str) {
        self.inbound.push_back(Inbound {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
        });
    }

    pub fn drop_connection(&mut self) {
        self.connected = false;
    }

    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }
}

impl BrokerLink for ScriptedLink {
    async fn connect(&mut self) -> Result<(), LinkError> {
        self.connect_attempts += 1;
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(LinkError::Connection("connection refused".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::Disconnected);
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
        if !self.connected {
            return Err(LinkError::Disconnected);
        }
        self.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    async fn service(&mut self, _wait: Duration) -> Result<Option<Inbound>, LinkError> {
        if !self.connected {
            return Err(LinkError::Disconnected);
        }
        Ok(self.inbound.pop_front())
    }

    async fn flush(&mut self, window: Duration) {
        self.flushed = Some(window);
    }
}

pub fn test_publisher(
    link: ScriptedLink,
    ctx: Arc<SharedContext>,
    store: MemoryConfigStore,
) -> Publisher<ScriptedLink, ManualClock> {
    let handler = CommandHandler::new(Box::new(store), ctx.clone());
    Publisher::new(link, handler, ctx, test_config(), TimeSource::new(ManualClock::new(T0)))
        .with_reconnect_policy(ReconnectPolicy::immediate())
        .with_poll_timeout(Duration::ZERO)
}
