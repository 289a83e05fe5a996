//! Test fixtures and data for harness tests

use shared::ConnectorConfig;
use std::time::Duration;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const ORDERS_TOPIC: &'static str = "orders";
    pub const AUDIT_TOPIC: &'static str = "audit";
    pub const ORDERS_CHANNEL: &'static str = "orders-channel";

    /// Completion-wait window used throughout the timing tests
    pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

    /// One connector in each direction, sharing a topic with a third
    pub fn connectors() -> Vec<ConnectorConfig> {
        vec![
            ConnectorConfig::new("StanToKafka", Self::ORDERS_TOPIC).with_channel(Self::ORDERS_CHANNEL),
            ConnectorConfig::new("KafkaToStan", Self::ORDERS_TOPIC).with_channel("orders-echo"),
            ConnectorConfig::new("KafkaToNats", Self::AUDIT_TOPIC).with_subject("audit.events"),
        ]
    }

    /// Unique topic per test run so live tests never collide
    pub fn unique_topic(prefix: &str) -> String {
        format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
    }
}
