//! Harness configuration
//!
//! Every value an environment depends on (broker addresses, certificate paths,
//! server binaries, timeouts) lives here and is passed in explicitly, so parallel
//! environments never share process-wide state.

use std::path::PathBuf;
use std::time::Duration;

use shared::TlsMaterial;

pub const DEFAULT_KAFKA_HOST_PORT: &str = "localhost:9092";
pub const DEFAULT_KAFKA_TLS_HOST_PORT: &str = "localhost:9093";
pub const DEFAULT_CONSUMER_GROUP_PREFIX: &str = "kbt";

/// Verbosity the bridge under test is configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeLogLevel {
    pub debug: bool,
    pub trace: bool,
    pub colors: bool,
}

impl Default for BridgeLogLevel {
    fn default() -> Self {
        // Full verbosity, no escape codes in captured test output
        Self {
            debug: true,
            trace: true,
            colors: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub kafka_host_port: String,
    pub kafka_tls_host_port: String,
    pub tls: TlsMaterial,
    pub nats_server_bin: PathBuf,
    pub streaming_server_bin: PathBuf,
    /// Budget for the reachability check and each topic creation at startup
    pub operation_timeout: Duration,
    /// How long a launched server may take to accept connections
    pub startup_timeout: Duration,
    pub consumer_group_prefix: String,
    pub wait_timeout: Duration,
    pub poll_interval: Duration,
    pub bridge_log: BridgeLogLevel,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            kafka_host_port: DEFAULT_KAFKA_HOST_PORT.to_string(),
            kafka_tls_host_port: DEFAULT_KAFKA_TLS_HOST_PORT.to_string(),
            tls: TlsMaterial::default(),
            nats_server_bin: PathBuf::from("nats-server"),
            streaming_server_bin: PathBuf::from("nats-streaming-server"),
            operation_timeout: Duration::from_millis(5000),
            startup_timeout: Duration::from_secs(10),
            consumer_group_prefix: DEFAULT_CONSUMER_GROUP_PREFIX.to_string(),
            wait_timeout: Duration::from_millis(5000),
            poll_interval: Duration::from_millis(50),
            bridge_log: BridgeLogLevel::default(),
        }
    }
}

impl HarnessConfig {
    pub fn builder() -> HarnessConfigBuilder {
        HarnessConfigBuilder::new()
    }

    /// Defaults overridden by `BRIDGE_HARNESS_*` variables, after loading `.env` if present
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = HarnessConfigBuilder::new();

        if let Some(addr) = lookup("BRIDGE_HARNESS_KAFKA") {
            builder = builder.kafka_host_port(addr);
        }
        if let Some(addr) = lookup("BRIDGE_HARNESS_KAFKA_TLS") {
            builder = builder.kafka_tls_host_port(addr);
        }
        if let Some(dir) = lookup("BRIDGE_HARNESS_CERT_DIR") {
            builder = builder.cert_dir(dir);
        }
        if let Some(bin) = lookup("BRIDGE_HARNESS_NATS_SERVER_BIN") {
            builder = builder.nats_server_bin(bin);
        }
        if let Some(bin) = lookup("BRIDGE_HARNESS_STREAMING_SERVER_BIN") {
            builder = builder.streaming_server_bin(bin);
        }

        builder.build()
    }

    /// Broker address for a plain or TLS environment
    pub fn kafka_address(&self, use_tls: bool) -> &str {
        if use_tls {
            &self.kafka_tls_host_port
        } else {
            &self.kafka_host_port
        }
    }
}

pub struct HarnessConfigBuilder {
    config: HarnessConfig,
}

impl HarnessConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: HarnessConfig::default(),
        }
    }

    /// Plain-text broker address
    pub fn kafka_host_port<S: Into<String>>(mut self, addr: S) -> Self {
        self.config.kafka_host_port = addr.into();
        self
    }

    /// TLS listener address of the same broker
    pub fn kafka_tls_host_port<S: Into<String>>(mut self, addr: S) -> Self {
        self.config.kafka_tls_host_port = addr.into();
        self
    }

    /// Use the standard certificate file names inside `dir`
    pub fn cert_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.tls = TlsMaterial::from_dir(dir.into());
        self
    }

    pub fn nats_server_bin<P: Into<PathBuf>>(mut self, bin: P) -> Self {
        self.config.nats_server_bin = bin.into();
        self
    }

    pub fn streaming_server_bin<P: Into<PathBuf>>(mut self, bin: P) -> Self {
        self.config.streaming_server_bin = bin.into();
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = timeout;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    pub fn consumer_group_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.consumer_group_prefix = prefix.into();
        self
    }

    /// Completion-wait deadline
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    /// Completion-wait counter sampling period
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn bridge_log(mut self, level: BridgeLogLevel) -> Self {
        self.config.bridge_log = level;
        self
    }

    pub fn build(self) -> HarnessConfig {
        self.config
    }
}

impl Default for HarnessConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
