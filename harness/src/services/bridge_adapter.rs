//! Bridge Lifecycle Adapter
//!
//! Turns the environment's live endpoints into a bridge configuration and drives
//! the bridge through initialize, start and stop.

use std::sync::Arc;

use shared::bridge_conf::{PORT_DISABLED, PORT_EPHEMERAL};
use shared::{
    component_debug, BridgeConfig, ClientId, ClusterId, Component, ConnectorConfig, HttpConfig, LoggingConfig,
    NatsConfig, StreamingConfig, TlsMaterial,
};

use crate::config::BridgeLogLevel;
use crate::error::HarnessResult;
use crate::traits::{Bridge, BridgeRequestCounter, RequestCounter};

const NATS_CONNECT_TIMEOUT_MS: u64 = 2000;
const NATS_RECONNECT_WAIT_MS: u64 = 2000;
const NATS_MAX_RECONNECTS: i32 = 5;
const STAN_PUB_ACK_WAIT_MS: u64 = 5000;
const STAN_CONNECT_WAIT_MS: u64 = 2000;

/// Live endpoints the bridge is pointed at
#[derive(Debug, Clone)]
pub struct BridgeEndpoints {
    pub nats_url: String,
    pub kafka_host_port: String,
    pub cluster_id: ClusterId,
    pub bridge_client_id: ClientId,
    /// Present only in TLS environments
    pub tls: Option<TlsMaterial>,
}

/// Bridge configuration for the given endpoints.
///
/// Connectors keep every field except `brokers` and `tls`, which are replaced
/// with the live broker address and, for TLS runs, the client certificate triple.
pub fn build_config(endpoints: &BridgeEndpoints, connectors: Vec<ConnectorConfig>, log: BridgeLogLevel) -> BridgeConfig {
    let logging = LoggingConfig {
        debug: log.debug,
        trace: log.trace,
        colors: log.colors,
        ..LoggingConfig::default()
    };

    let mut monitoring = HttpConfig {
        http_port: PORT_EPHEMERAL,
        ..HttpConfig::default()
    };
    let mut nats = NatsConfig {
        servers: vec![endpoints.nats_url.clone()],
        connect_timeout: NATS_CONNECT_TIMEOUT_MS,
        reconnect_wait: NATS_RECONNECT_WAIT_MS,
        max_reconnects: NATS_MAX_RECONNECTS,
        ..NatsConfig::default()
    };

    if let Some(tls) = &endpoints.tls {
        monitoring.http_port = PORT_DISABLED;
        monitoring.https_port = PORT_EPHEMERAL;
        monitoring.tls = tls.server_conf();
        nats.tls = tls.trust_conf();
    }

    let stan = StreamingConfig {
        cluster_id: endpoints.cluster_id.to_string(),
        client_id: endpoints.bridge_client_id.to_string(),
        pub_ack_wait: STAN_PUB_ACK_WAIT_MS,
        connect_wait: STAN_CONNECT_WAIT_MS,
        ..StreamingConfig::default()
    };

    let connect = connectors
        .into_iter()
        .map(|mut connector| {
            connector.brokers = vec![endpoints.kafka_host_port.clone()];
            if let Some(tls) = &endpoints.tls {
                connector.tls = tls.client_conf();
            }
            connector
        })
        .collect();

    BridgeConfig {
        logging,
        monitoring,
        nats,
        stan,
        connect,
    }
}

/// Holds at most one bridge instance
#[derive(Default)]
pub struct BridgeAdapter {
    bridge: Option<Arc<dyn Bridge>>,
    running: bool,
}

impl BridgeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bridge(&self) -> Option<&Arc<dyn Bridge>> {
        self.bridge.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Request counter of the held bridge, for the completion waiter
    pub fn counter(&self) -> Option<Arc<dyn RequestCounter>> {
        self.bridge
            .as_ref()
            .map(|bridge| Arc::new(BridgeRequestCounter(Arc::clone(bridge))) as Arc<dyn RequestCounter>)
    }

    /// Initialize then start. No retry: the first error is returned and the
    /// bridge stays held so `stop` can still release it.
    pub async fn start(&mut self, bridge: Arc<dyn Bridge>, config: BridgeConfig) -> HarnessResult<()> {
        if let Ok(json) = config.to_json_pretty() {
            component_debug!(Component::Bridge, "🧾 Bridge configuration:\n{}", json);
        }

        self.bridge = Some(Arc::clone(&bridge));
        bridge.initialize_from_config(config).await?;
        bridge.start().await?;
        self.running = true;

        component_debug!(Component::Bridge, "🚀 Bridge started");
        Ok(())
    }

    /// Stop and release the bridge; a no-op when none is held
    pub async fn stop(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            bridge.stop().await;
            self.running = false;
            component_debug!(Component::Bridge, "🛑 Bridge stopped");
        }
    }
}
