//! Environment orchestrator
//!
//! The aggregate a test owns: one queue broker client, one streaming cluster and
//! at most one bridge. Startup runs strictly in dependency order and tears
//! everything down on failure; `close` runs the reverse order and is safe to
//! call any number of times.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use shared::{
    component_debug, component_warn, logging, BridgeConfig, ClientId, ClusterId, Component, ConnectorConfig,
    Identities,
};

use crate::config::HarnessConfig;
use crate::core::{collect_topics, topic_set, CompletionWaiter, EnvironmentState, StateEvent, Teardown};
use crate::error::{HarnessError, HarnessResult};
use crate::services::bridge_adapter::{build_config, BridgeAdapter, BridgeEndpoints};
use crate::services::kafka::{KafkaClient, KafkaReader, KafkaRecord};
use crate::services::stan::StreamingConnection;
use crate::services::streaming::StreamingCluster;
use crate::traits::Bridge;

pub struct Environment {
    config: HarnessConfig,
    use_tls: bool,
    identities: Identities,
    state: EnvironmentState,
    kafka: KafkaClient,
    streaming: StreamingCluster,
    adapter: BridgeAdapter,
    /// Broker port chosen on first start, reused by restarts
    nats_port: Option<u16>,
    bridge_config: Option<BridgeConfig>,
}

impl Environment {
    /// Empty environment with fresh identities; nothing is started yet
    pub fn new(config: HarnessConfig, use_tls: bool) -> Self {
        let kafka = KafkaClient::new(
            config.kafka_address(use_tls),
            use_tls.then(|| config.tls.clone()),
            config.consumer_group_prefix.clone(),
        );
        let streaming = StreamingCluster::new(&config, use_tls);

        Self {
            config,
            use_tls,
            identities: Identities::generate(),
            state: EnvironmentState::Uninitialized,
            kafka,
            streaming,
            adapter: BridgeAdapter::new(),
            nats_port: None,
            bridge_config: None,
        }
    }

    /// Plain-text environment with the bridge running
    pub async fn start(
        config: HarnessConfig,
        connectors: Vec<ConnectorConfig>,
        bridge: Arc<dyn Bridge>,
    ) -> HarnessResult<Self> {
        Self::start_with(config, false, connectors, bridge).await
    }

    /// TLS environment with the bridge running
    pub async fn start_tls(
        config: HarnessConfig,
        connectors: Vec<ConnectorConfig>,
        bridge: Arc<dyn Bridge>,
    ) -> HarnessResult<Self> {
        Self::start_with(config, true, connectors, bridge).await
    }

    async fn start_with(
        config: HarnessConfig,
        use_tls: bool,
        connectors: Vec<ConnectorConfig>,
        bridge: Arc<dyn Bridge>,
    ) -> HarnessResult<Self> {
        let mut env = Self::new(config, use_tls);
        env.start_infrastructure(&collect_topics(&connectors)).await?;
        env.start_bridge(bridge, connectors).await?;
        Ok(env)
    }

    /// Check the queue broker, create every topic, then start the streaming cluster.
    /// On failure the environment is closed before the error is returned.
    pub async fn start_infrastructure<S: AsRef<str>>(&mut self, topics: &[S]) -> HarnessResult<()> {
        self.state.ensure(StateEvent::InfrastructureStarted)?;
        logging::log_startup(
            Component::Environment,
            &format!("infrastructure (tls={}, kafka={})", self.use_tls, self.kafka.host_port()),
        );

        match self.bring_up_infrastructure(topics).await {
            Ok(()) => {
                self.state = self.state.apply(StateEvent::InfrastructureStarted)?;
                Ok(())
            }
            Err(e) => Err(self.abort("start_infrastructure", e).await),
        }
    }

    async fn bring_up_infrastructure<S: AsRef<str>>(&mut self, topics: &[S]) -> HarnessResult<()> {
        let timeout = self.config.operation_timeout;
        self.kafka.check_reachable(timeout).await?;

        for topic in topic_set(topics) {
            self.kafka.create_topic(&topic, timeout).await?;
        }

        let port = self.streaming.start(self.nats_port, &self.identities).await?;
        self.nats_port = Some(port);
        Ok(())
    }

    /// Configure the bridge against the live endpoints and start it.
    /// On failure the environment is closed before the error is returned.
    pub async fn start_bridge(&mut self, bridge: Arc<dyn Bridge>, connectors: Vec<ConnectorConfig>) -> HarnessResult<()> {
        self.state.ensure(StateEvent::BridgeStarted)?;

        let Some(nats_url) = self.streaming.nats_url() else {
            return Err(HarnessError::InvalidState {
                operation: "start_bridge".to_string(),
                state: "streaming stopped".to_string(),
            });
        };

        let endpoints = BridgeEndpoints {
            nats_url: nats_url.to_string(),
            kafka_host_port: self.kafka.host_port().to_string(),
            cluster_id: self.identities.cluster_id.clone(),
            bridge_client_id: self.identities.bridge_client_id.clone(),
            tls: self.use_tls.then(|| self.config.tls.clone()),
        };
        let bridge_config = build_config(&endpoints, connectors, self.config.bridge_log);
        self.bridge_config = Some(bridge_config.clone());

        match self.adapter.start(bridge, bridge_config).await {
            Ok(()) => {
                self.state = self.state.apply(StateEvent::BridgeStarted)?;
                logging::log_success(Component::Bridge, "Bridge running");
                Ok(())
            }
            Err(e) => Err(self.abort("start_bridge", e).await),
        }
    }

    /// Stop the bridge, leaving the infrastructure up
    pub async fn stop_bridge(&mut self) -> HarnessResult<()> {
        self.state.ensure(StateEvent::BridgeStopped)?;
        self.adapter.stop().await;
        self.state = self.state.apply(StateEvent::BridgeStopped)?;
        Ok(())
    }

    /// Take the streaming layer down without bringing it back, to simulate an outage
    pub async fn stop_streaming(&mut self) -> HarnessResult<()> {
        self.state.ensure(StateEvent::StreamingRestarted)?;
        logging::log_shutdown(Component::StreamingServer, "outage requested");
        self.streaming.stop().await
    }

    /// Replace the streaming cluster on the same port with the same identities.
    ///
    /// Bypass connections are rebuilt; re-acquire them through [`Environment::nats`]
    /// and [`Environment::streaming`]. On failure the environment is closed.
    pub async fn restart_streaming(&mut self) -> HarnessResult<()> {
        self.state.ensure(StateEvent::StreamingRestarted)?;
        logging::log_startup(Component::StreamingServer, "restart on the same port");

        match self.streaming.restart(self.nats_port, &self.identities).await {
            Ok(port) => {
                self.nats_port = Some(port);
                self.state = self.state.apply(StateEvent::StreamingRestarted)?;
                Ok(())
            }
            Err(e) => Err(self.abort("restart_streaming", e).await),
        }
    }

    /// Best-effort teardown: bridge, bypass connections, streaming server, broker.
    /// Every step runs regardless of earlier failures; repeated calls are no-ops.
    pub async fn close(&mut self) -> HarnessResult<()> {
        if self.state == EnvironmentState::Closed {
            return Ok(());
        }

        let mut teardown = Teardown::new(Component::Environment);
        if self.adapter.bridge().is_some() {
            self.adapter.stop().await;
            teardown.record("bridge", Ok(()));
        } else {
            teardown.skip("bridge");
        }
        self.streaming.stop_into(&mut teardown).await;

        self.state = self.state.apply(StateEvent::Closed)?;
        component_debug!(
            Component::Environment,
            "🧹 Closed: {} stopped, {} skipped, {} failed",
            teardown.completed().len(),
            teardown.skipped().len(),
            teardown.failures().len()
        );
        teardown.finish()
    }

    /// Close after a failed step, returning the step's error
    async fn abort(&mut self, operation: &str, error: HarnessError) -> HarnessError {
        logging::log_error(Component::Environment, operation, &error);
        if let Err(close_error) = self.close().await {
            logging::log_error(Component::Environment, "close after failure", &close_error);
        }
        error
    }

    fn waiter(&self) -> Option<CompletionWaiter> {
        self.adapter.counter().map(|counter| {
            CompletionWaiter::new(counter)
                .with_timeout(self.config.wait_timeout)
                .with_poll_interval(self.config.poll_interval)
        })
    }

    /// Wait until the bridge has processed `target` requests
    pub async fn wait_for_requests(&self, target: i64) -> bool {
        match self.waiter() {
            Some(waiter) => waiter.wait_for_count(target).await,
            None => {
                component_warn!(Component::Waiter, "⚠️ No bridge to wait on");
                false
            }
        }
    }

    /// Wait for `signal` and for the bridge to reach `target` requests; the
    /// signal is returned only if both happen before the deadline
    pub async fn wait_for_signal<T: Send + 'static>(&self, target: i64, signal: mpsc::Receiver<T>) -> Option<T> {
        match self.waiter() {
            Some(waiter) => waiter.wait_for_signal(target, signal).await,
            None => {
                component_warn!(Component::Waiter, "⚠️ No bridge to wait on");
                None
            }
        }
    }

    /// Bypass write of one keyless record
    pub async fn send_to_kafka(&self, topic: &str, payload: &[u8], timeout: Duration) -> HarnessResult<()> {
        self.kafka.produce(topic, payload, timeout).await
    }

    pub async fn create_kafka_reader(&self, topic: &str, timeout: Duration) -> HarnessResult<KafkaReader> {
        self.kafka.new_consumer(topic, timeout).await
    }

    pub async fn read_from_kafka(&self, reader: &KafkaReader, timeout: Duration) -> HarnessResult<Option<KafkaRecord>> {
        self.kafka.consume(reader, timeout).await
    }

    pub fn state(&self) -> EnvironmentState {
        self.state
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    pub fn kafka(&self) -> &KafkaClient {
        &self.kafka
    }

    pub fn kafka_host_port(&self) -> &str {
        self.kafka.host_port()
    }

    pub fn nats_url(&self) -> Option<&str> {
        self.streaming.nats_url()
    }

    pub fn nats_port(&self) -> Option<u16> {
        self.nats_port
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.identities.cluster_id
    }

    pub fn bypass_client_id(&self) -> &ClientId {
        &self.identities.bypass_client_id
    }

    pub fn bridge_client_id(&self) -> &ClientId {
        &self.identities.bridge_client_id
    }

    pub fn bridge(&self) -> Option<&Arc<dyn Bridge>> {
        self.adapter.bridge()
    }

    /// Configuration the running bridge was started with
    pub fn bridge_config(&self) -> Option<&BridgeConfig> {
        self.bridge_config.as_ref()
    }

    /// Raw bypass connection; absent while the streaming layer is down
    pub fn nats(&self) -> Option<&async_nats::Client> {
        self.streaming.nats()
    }

    /// Bypass streaming connection; absent while the streaming layer is down
    pub fn streaming(&self) -> Option<&StreamingConnection> {
        self.streaming.streaming()
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.state.is_infrastructure_up() {
            component_warn!(
                Component::Environment,
                "⚠️ Environment dropped without close; child processes are killed without a graceful stop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockBridge;

    fn unreachable_config() -> HarnessConfig {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        HarnessConfig::builder()
            .kafka_host_port(format!("127.0.0.1:{port}"))
            .operation_timeout(Duration::from_millis(300))
            .build()
    }

    #[tokio::test]
    async fn test_close_without_start_is_idempotent() {
        let mut env = Environment::new(HarnessConfig::default(), false);
        assert!(env.close().await.is_ok());
        assert!(env.close().await.is_ok());
        assert_eq!(env.state(), EnvironmentState::Closed);
    }

    #[tokio::test]
    async fn test_unreachable_broker_closes_environment() {
        let mut env = Environment::new(unreachable_config(), false);
        let err = env.start_infrastructure(&["orders"]).await.unwrap_err();

        assert!(matches!(err, HarnessError::Connectivity { .. }));
        assert_eq!(env.state(), EnvironmentState::Closed);
        assert!(env.nats_url().is_none());
        assert!(env.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_bridge_requires_infrastructure() {
        let mut env = Environment::new(HarnessConfig::default(), false);
        let err = env
            .start_bridge(Arc::new(MockBridge::new()), Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::InvalidState { .. }));
        assert_eq!(env.state(), EnvironmentState::Uninitialized);
    }

    #[tokio::test]
    async fn test_restart_requires_infrastructure() {
        let mut env = Environment::new(HarnessConfig::default(), false);
        assert!(env.restart_streaming().await.is_err());
        assert!(env.stop_streaming().await.is_err());
        assert!(env.stop_bridge().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_without_bridge_fails_fast() {
        let env = Environment::new(HarnessConfig::default(), false);
        assert!(!env.wait_for_requests(1).await);
        let (_tx, rx) = mpsc::channel::<()>(1);
        assert!(env.wait_for_signal(1, rx).await.is_none());
    }

    #[test]
    fn test_identities_are_per_environment() {
        let a = Environment::new(HarnessConfig::default(), false);
        let b = Environment::new(HarnessConfig::default(), true);

        assert_ne!(a.cluster_id(), b.cluster_id());
        assert_ne!(a.bypass_client_id(), a.bridge_client_id());
        assert_eq!(a.kafka_host_port(), "localhost:9092");
        assert_eq!(b.kafka_host_port(), "localhost:9093");
        assert!(b.kafka().uses_tls());
    }
}
