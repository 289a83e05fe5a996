//! Queue broker client
//!
//! Reachability checks, topic creation and bypass produce/consume directly
//! against the broker. Every connection is configured through
//! [`KafkaClient::client_config`] so TLS is applied in exactly one place.

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::time::Duration;
use tokio::net::TcpStream;

use shared::{component_debug, Component, TlsMaterial};

use crate::error::{HarnessError, HarnessResult};

/// Deadline the broker gets to apply a topic creation
const CREATE_TOPIC_DEADLINE: Duration = Duration::from_secs(15);
/// Producers batch for this long before sending
const PRODUCER_LINGER_MS: u128 = 5;
/// Upper fetch bound for bypass readers
pub const READER_MAX_BYTES: usize = 10_000;

/// One record read through the bypass path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaRecord {
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

/// Long-lived consumer-group reader bound to one topic
pub struct KafkaReader {
    consumer: StreamConsumer,
    topic: String,
    group_id: String,
}

impl KafkaReader {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Read exactly one record, `None` if nothing arrives within `timeout`
    pub async fn read(&self, timeout: Duration) -> HarnessResult<Option<KafkaRecord>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(message)) => Ok(message.payload().map(|value| KafkaRecord {
                key: message.key().map(<[u8]>::to_vec),
                value: value.to_vec(),
                partition: message.partition(),
                offset: message.offset(),
            })),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KafkaClient {
    host_port: String,
    tls: Option<TlsMaterial>,
    group_prefix: String,
}

impl KafkaClient {
    /// `tls` is set only for TLS-enabled environments
    pub fn new(host_port: impl Into<String>, tls: Option<TlsMaterial>, group_prefix: impl Into<String>) -> Self {
        Self {
            host_port: host_port.into(),
            tls,
            group_prefix: group_prefix.into(),
        }
    }

    pub fn host_port(&self) -> &str {
        &self.host_port
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Consumer group a bypass reader of `topic` joins
    pub fn group_id(&self, topic: &str) -> String {
        format!("{}-{}", self.group_prefix, topic)
    }

    /// Shared connection settings; carries client certificate, key and trust root
    /// only when TLS is enabled
    pub fn client_config(&self, timeout: Duration) -> HarnessResult<ClientConfig> {
        let millis = timeout.as_millis();
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.host_port)
            .set("socket.timeout.ms", millis.clamp(10, 300_000).to_string())
            .set("socket.connection.setup.timeout.ms", millis.max(1000).to_string());

        if let Some(tls) = &self.tls {
            tls.validate_client()?;
            config
                .set("security.protocol", "ssl")
                .set("ssl.certificate.location", tls.client_cert.display().to_string())
                .set("ssl.key.location", tls.client_key.display().to_string())
                .set("ssl.ca.location", tls.ca_file.display().to_string());
        }

        Ok(config)
    }

    /// Open a plain TCP connection to the broker within `timeout`
    async fn dial(&self, timeout: Duration) -> HarnessResult<()> {
        match tokio::time::timeout(timeout, TcpStream::connect(&self.host_port)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(HarnessError::connectivity(&self.host_port, e)),
            Err(_) => Err(HarnessError::connectivity(
                &self.host_port,
                format!("dial timed out after {timeout:?}"),
            )),
        }
    }

    /// Confirm the broker accepts connections and serves cluster metadata
    pub async fn check_reachable(&self, timeout: Duration) -> HarnessResult<()> {
        self.dial(timeout).await?;

        let config = self.client_config(timeout)?;
        let metadata = tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config.create()?;
            consumer.fetch_metadata(None, timeout)
        })
        .await
        .map_err(|e| HarnessError::lifecycle(Component::QueueBroker, e))?
        .map_err(|e| HarnessError::connectivity(&self.host_port, e))?;

        if metadata.brokers().is_empty() {
            return Err(HarnessError::connectivity(
                &self.host_port,
                "broker returned no cluster metadata",
            ));
        }

        component_debug!(
            Component::QueueBroker,
            "🔌 {} reachable (broker id {}, {} broker(s))",
            self.host_port,
            metadata.orig_broker_id(),
            metadata.brokers().len()
        );
        Ok(())
    }

    /// Create a single-partition, single-replica topic. Broker-side errors,
    /// including an existing topic, are returned as-is.
    pub async fn create_topic(&self, topic: &str, timeout: Duration) -> HarnessResult<()> {
        self.dial(timeout)
            .await
            .map_err(|e| HarnessError::provisioning(topic, e))?;

        let admin: AdminClient<DefaultClientContext> = self.client_config(timeout)?.create()?;
        let options = AdminOptions::new()
            .operation_timeout(Some(CREATE_TOPIC_DEADLINE))
            .request_timeout(Some(CREATE_TOPIC_DEADLINE));
        let new_topic = NewTopic::new(topic, 1, TopicReplication::Fixed(1));

        let results = admin
            .create_topics(&[new_topic], &options)
            .await
            .map_err(|e| HarnessError::provisioning(topic, e))?;

        for result in results {
            if let Err((name, code)) = result {
                return Err(HarnessError::provisioning(name, code));
            }
        }

        component_debug!(Component::QueueBroker, "📦 Created topic '{}'", topic);
        Ok(())
    }

    /// Write one keyless record to partition 0 of `topic`. The whole call is
    /// bounded by `timeout`, including delivery confirmation.
    pub async fn produce(&self, topic: &str, payload: &[u8], timeout: Duration) -> HarnessResult<()> {
        let producer: FutureProducer = self
            .client_config(timeout)?
            .set("linger.ms", PRODUCER_LINGER_MS.to_string())
            .set("message.timeout.ms", delivery_timeout_ms(timeout).to_string())
            .create()?;

        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload).partition(0);
        let delivery = tokio::time::timeout(timeout, producer.send(record, Timeout::After(timeout))).await;
        let (partition, offset) = match delivery {
            Ok(Ok(position)) => position,
            Ok(Err((e, _message))) => return Err(e.into()),
            Err(_) => {
                return Err(HarnessError::connectivity(
                    &self.host_port,
                    format!("produce to '{topic}' timed out after {timeout:?}"),
                ))
            }
        };

        component_debug!(
            Component::QueueBroker,
            "📤 Produced {} bytes to {}[{}]@{}",
            payload.len(),
            topic,
            partition,
            offset
        );
        Ok(())
    }

    /// Reader in consumer group `<prefix>-<topic>`, fetching 1 byte to 10 KB at a time.
    /// The stream consumer registers its wakeups on the current tokio runtime.
    pub async fn new_consumer(&self, topic: &str, timeout: Duration) -> HarnessResult<KafkaReader> {
        let group_id = self.group_id(topic);
        let consumer: StreamConsumer = self
            .client_config(timeout)?
            .set("group.id", &group_id)
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", "1")
            .set("fetch.max.bytes", READER_MAX_BYTES.to_string())
            .set("message.max.bytes", READER_MAX_BYTES.to_string())
            .set("max.partition.fetch.bytes", READER_MAX_BYTES.to_string())
            .create()?;

        consumer.subscribe(&[topic])?;

        Ok(KafkaReader {
            consumer,
            topic: topic.to_string(),
            group_id,
        })
    }

    /// Read one record through `reader`; `None` when the deadline passes first
    pub async fn consume(&self, reader: &KafkaReader, timeout: Duration) -> HarnessResult<Option<KafkaRecord>> {
        reader.read(timeout).await
    }
}

/// librdkafka reads a zero message timeout as "never expire", so keep it
/// positive and past the linger window
fn delivery_timeout_ms(timeout: Duration) -> u128 {
    timeout.as_millis().max(PRODUCER_LINGER_MS + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tls_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["client-cert.pem", "client-key.pem", "truststore.pem"] {
            std::fs::write(dir.path().join(name), "pem").unwrap();
        }
        dir
    }

    #[test]
    fn test_plain_config_has_no_tls_material() {
        let client = KafkaClient::new("localhost:9092", None, "kbt");
        let config = client.client_config(Duration::from_millis(5000)).unwrap();

        assert_eq!(config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(config.get("security.protocol"), None);
        assert_eq!(config.get("ssl.ca.location"), None);
        assert_eq!(config.get("ssl.certificate.location"), None);
        assert_eq!(config.get("ssl.key.location"), None);
    }

    #[test]
    fn test_tls_config_uses_client_triple() {
        let dir = tls_dir();
        let tls = TlsMaterial::from_dir(dir.path());
        let client = KafkaClient::new("localhost:9093", Some(tls.clone()), "kbt");
        let config = client.client_config(Duration::from_millis(5000)).unwrap();

        assert_eq!(config.get("security.protocol"), Some("ssl"));
        assert_eq!(
            config.get("ssl.certificate.location"),
            Some(tls.client_cert.display().to_string().as_str())
        );
        assert_eq!(config.get("ssl.key.location"), Some(tls.client_key.display().to_string().as_str()));
        assert_eq!(config.get("ssl.ca.location"), Some(tls.ca_file.display().to_string().as_str()));
    }

    #[test]
    fn test_tls_config_fails_without_material() {
        let dir = tempfile::tempdir().unwrap();
        let client = KafkaClient::new("localhost:9093", Some(TlsMaterial::from_dir(dir.path())), "kbt");
        assert!(client.client_config(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_timeouts_clamped_to_librdkafka_ranges() {
        let client = KafkaClient::new("localhost:9092", None, "kbt");
        let config = client.client_config(Duration::from_millis(5)).unwrap();
        assert_eq!(config.get("socket.timeout.ms"), Some("10"));
        assert_eq!(config.get("socket.connection.setup.timeout.ms"), Some("1000"));
    }

    #[test]
    fn test_group_id_derived_from_topic() {
        let client = KafkaClient::new("localhost:9092", None, "kbt");
        assert_eq!(client.group_id("orders"), "kbt-orders");
    }

    fn closed_port_client() -> KafkaClient {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        KafkaClient::new(format!("127.0.0.1:{port}"), None, "kbt")
    }

    #[test]
    fn test_delivery_timeout_never_zero() {
        assert_eq!(delivery_timeout_ms(Duration::ZERO), 6);
        assert_eq!(delivery_timeout_ms(Duration::from_micros(500)), 6);
        assert_eq!(delivery_timeout_ms(Duration::from_millis(3)), 6);
        assert_eq!(delivery_timeout_ms(Duration::from_millis(2500)), 2500);
    }

    #[tokio::test]
    async fn test_produce_with_zero_budget_returns_promptly() {
        let client = closed_port_client();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            client.produce("orders", b"x", Duration::ZERO),
        )
        .await;
        let err = outcome.expect("produce must respect its budget").unwrap_err();
        assert!(matches!(err, HarnessError::Connectivity { .. }));
    }

    #[tokio::test]
    async fn test_produce_to_closed_port_fails_within_budget() {
        let client = closed_port_client();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            client.produce("orders", b"x", Duration::from_millis(300)),
        )
        .await;
        assert!(outcome.expect("produce must respect its budget").is_err());
    }

    #[tokio::test]
    async fn test_new_consumer_joins_topic_group() {
        let client = closed_port_client();
        let reader = client.new_consumer("orders", Duration::from_millis(500)).await.unwrap();
        assert_eq!(reader.topic(), "orders");
        assert_eq!(reader.group_id(), "kbt-orders");
    }

    #[tokio::test]
    async fn test_unreachable_broker_is_connectivity_error() {
        let client = closed_port_client();

        let err = client.check_reachable(Duration::from_millis(500)).await.unwrap_err();
        assert!(matches!(err, HarnessError::Connectivity { .. }));
    }
}
