//! Configuration record consumed by the bridge under test
//!
//! The harness only builds these values; parsing them from files is the bridge's
//! own concern. Durations are milliseconds, ports follow the bridge's convention
//! where `0` disables a listener and `-1` asks for an ephemeral port.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{SharedError, SharedResult};

/// Listener disabled
pub const PORT_DISABLED: i32 = 0;
/// Listener on a port chosen at bind time
pub const PORT_EPHEMERAL: i32 = -1;

/// Subject prefix the streaming server listens on for connect requests
pub const DEFAULT_DISCOVER_PREFIX: &str = "_STAN.discover";
/// Streaming client default for unacknowledged publishes
pub const DEFAULT_MAX_PUB_ACKS_INFLIGHT: i32 = 16384;

/// Certificate material for one connection; every part is optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsConf {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub root: Option<PathBuf>,
}

impl TlsConf {
    pub fn is_empty(&self) -> bool {
        self.cert.is_none() && self.key.is_none() && self.root.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub time: bool,
    pub debug: bool,
    pub trace: bool,
    pub colors: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            time: true,
            debug: false,
            trace: false,
            colors: true,
        }
    }
}

/// Monitoring endpoint of the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub http_host: String,
    pub http_port: i32,
    pub https_port: i32,
    pub tls: TlsConf,
    pub read_timeout: u64,
    pub write_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            http_host: String::new(),
            http_port: PORT_DISABLED,
            https_port: PORT_DISABLED,
            tls: TlsConf::default(),
            read_timeout: 5000,
            write_timeout: 5000,
        }
    }
}

/// Connection to the pub/sub broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub connect_timeout: u64,
    pub reconnect_wait: u64,
    pub max_reconnects: i32,
    pub tls: TlsConf,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            connect_timeout: 5000,
            reconnect_wait: 1000,
            max_reconnects: 0,
            tls: TlsConf::default(),
        }
    }
}

/// Streaming client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingConfig {
    pub cluster_id: String,
    pub client_id: String,
    pub pub_ack_wait: u64,
    pub discover_prefix: String,
    pub max_pub_acks_inflight: i32,
    pub connect_wait: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            client_id: String::new(),
            pub_ack_wait: 5000,
            discover_prefix: DEFAULT_DISCOVER_PREFIX.to_string(),
            max_pub_acks_inflight: DEFAULT_MAX_PUB_ACKS_INFLIGHT,
            connect_wait: 2000,
        }
    }
}

/// One data path through the bridge.
///
/// The harness only ever touches `brokers` and `tls`; every other field belongs to
/// the bridge and passes through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub id: String,
    pub connector_type: String,
    pub topic: String,
    pub brokers: Vec<String>,
    pub tls: TlsConf,
    pub channel: String,
    pub durable_name: String,
    pub subject: String,
    pub queue_name: String,
    pub group_id: String,
    pub partition: i64,
    pub key_type: String,
    pub key_value: String,
}

impl ConnectorConfig {
    pub fn new(connector_type: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

/// Complete configuration handed to the bridge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub logging: LoggingConfig,
    pub monitoring: HttpConfig,
    pub nats: NatsConfig,
    pub stan: StreamingConfig,
    pub connect: Vec<ConnectorConfig>,
}

impl BridgeConfig {
    pub fn to_json_pretty(&self) -> SharedResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| SharedError::SerializationError {
            message: e.to_string(),
        })
    }
}
