//! Streaming Cluster Launcher
//!
//! Runs a pub/sub broker and a durable streaming server layered on it as child
//! processes, then opens the bypass connections tests use to reach them. The
//! broker's port is fixed on first start and reused by every restart.

use async_nats::{Client, ConnectOptions};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::time::Instant;

use shared::logging::log_success;
use shared::{component_debug, component_warn, Component, Identities, TlsMaterial};

use crate::config::HarnessConfig;
use crate::core::teardown::Teardown;
use crate::error::{HarnessError, HarnessResult};
use crate::services::process::{ManagedProcess, DEFAULT_STOP_GRACE};
use crate::services::stan::{StreamingConnection, StreamingOptions};

/// Seconds the broker allows for a TLS handshake
pub const TLS_HANDSHAKE_TIMEOUT_SECS: u32 = 5;
const READINESS_PROBE_INTERVAL: Duration = Duration::from_millis(100);
const LISTEN_HOST: &str = "127.0.0.1";

/// Ask the OS for a port nothing is listening on
pub fn free_port() -> HarnessResult<u16> {
    let listener = TcpListener::bind((LISTEN_HOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Broker URL the bridge and bypass clients connect to
pub fn nats_url(use_tls: bool, port: u16) -> String {
    let scheme = if use_tls { "tls" } else { "nats" };
    format!("{scheme}://localhost:{port}")
}

/// Broker configuration carrying the server certificate and handshake timeout
pub fn render_nats_conf(tls: &TlsMaterial) -> String {
    format!(
        "tls {{\n  cert_file: \"{}\"\n  key_file: \"{}\"\n  timeout: {}\n}}\n",
        tls.server_cert.display(),
        tls.server_key.display(),
        TLS_HANDSHAKE_TIMEOUT_SECS
    )
}

/// Certificate files the bypass pub/sub connection presents in TLS runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BypassTls {
    pub root_ca: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

/// Client triple for the bypass connection; `None` for plain-text runs
pub fn bypass_tls(tls: Option<&TlsMaterial>) -> Option<BypassTls> {
    tls.map(|tls| BypassTls {
        root_ca: tls.ca_file.clone(),
        client_cert: tls.client_cert.clone(),
        client_key: tls.client_key.clone(),
    })
}

fn bypass_connect_options(timeout: Duration, tls: Option<BypassTls>) -> ConnectOptions {
    let options = ConnectOptions::new()
        .name("bridge-harness-bypass")
        .connection_timeout(timeout);

    match tls {
        Some(tls) => options
            .require_tls(true)
            .add_root_certificates(tls.root_ca)
            .add_client_certificate(tls.client_cert, tls.client_key),
        None => options,
    }
}

pub fn nats_server_args(port: u16, conf: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "-a".to_string(),
        LISTEN_HOST.to_string(),
        "-p".to_string(),
        port.to_string(),
    ];
    if let Some(conf) = conf {
        args.push("-c".to_string());
        args.push(conf.display().to_string());
    }
    args
}

/// Streaming server attached to the broker at `url` rather than its own embedded one
pub fn streaming_server_args(cluster_id: &str, url: &str, tls: Option<&TlsMaterial>) -> Vec<String> {
    let mut args = vec![
        "-cid".to_string(),
        cluster_id.to_string(),
        "-ns".to_string(),
        url.to_string(),
    ];
    if let Some(tls) = tls {
        args.extend([
            "--tls_client_cert".to_string(),
            tls.client_cert.display().to_string(),
            "--tls_client_key".to_string(),
            tls.client_key.display().to_string(),
            "--tls_client_cacert".to_string(),
            tls.ca_file.display().to_string(),
        ]);
    }
    args
}

/// Poll until something accepts connections on `port`, failing early if the
/// process exits
async fn wait_for_port(process: &mut ManagedProcess, component: Component, port: u16, timeout: Duration) -> HarnessResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if TcpStream::connect((LISTEN_HOST, port)).await.is_ok() {
            return Ok(());
        }
        if process.has_exited() {
            return Err(HarnessError::lifecycle(component, "exited before accepting connections"));
        }
        if Instant::now() >= deadline {
            return Err(HarnessError::lifecycle(
                component,
                format!("not accepting connections on {port} after {timeout:?}"),
            ));
        }
        tokio::time::sleep(READINESS_PROBE_INTERVAL).await;
    }
}

pub struct StreamingCluster {
    nats_server_bin: PathBuf,
    streaming_server_bin: PathBuf,
    tls: Option<TlsMaterial>,
    startup_timeout: Duration,
    options: StreamingOptions,
    port: Option<u16>,
    nats_url: Option<String>,
    conf_dir: Option<TempDir>,
    nats_server: Option<ManagedProcess>,
    streaming_server: Option<ManagedProcess>,
    nats: Option<Client>,
    streaming: Option<StreamingConnection>,
}

impl StreamingCluster {
    pub fn new(config: &HarnessConfig, use_tls: bool) -> Self {
        Self {
            nats_server_bin: config.nats_server_bin.clone(),
            streaming_server_bin: config.streaming_server_bin.clone(),
            tls: use_tls.then(|| config.tls.clone()),
            startup_timeout: config.startup_timeout,
            options: StreamingOptions::default(),
            port: None,
            nats_url: None,
            conf_dir: None,
            nats_server: None,
            streaming_server: None,
            nats: None,
            streaming: None,
        }
    }

    pub fn use_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Port chosen on first start, kept across stop and restart
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn nats_url(&self) -> Option<&str> {
        self.nats_url.as_deref()
    }

    /// Raw bypass connection
    pub fn nats(&self) -> Option<&Client> {
        self.nats.as_ref()
    }

    /// Bypass streaming connection
    pub fn streaming(&self) -> Option<&StreamingConnection> {
        self.streaming.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.nats_server.is_some()
    }

    /// Start the broker on `port` (`None` picks a free one), then the streaming
    /// server, then both bypass connections. Whatever started before a failure
    /// stays recorded for `stop`.
    pub async fn start(&mut self, port: Option<u16>, identities: &Identities) -> HarnessResult<u16> {
        let port = match port {
            Some(port) => port,
            None => free_port()?,
        };
        self.port = Some(port);

        let conf = match self.tls.clone() {
            Some(tls) => Some(self.write_tls_conf(&tls)?),
            None => None,
        };

        let mut nats_server = ManagedProcess::spawn(
            Component::NatsServer,
            &self.nats_server_bin.display().to_string(),
            &nats_server_args(port, conf.as_deref()),
        )?;
        let ready = wait_for_port(&mut nats_server, Component::NatsServer, port, self.startup_timeout).await;
        self.nats_server = Some(nats_server);
        ready?;

        let url = nats_url(self.use_tls(), port);
        self.nats_url = Some(url.clone());
        component_debug!(Component::NatsServer, "📡 Broker listening at {}", url);

        self.streaming_server = Some(ManagedProcess::spawn(
            Component::StreamingServer,
            &self.streaming_server_bin.display().to_string(),
            &streaming_server_args(identities.cluster_id.as_str(), &url, self.tls.as_ref()),
        )?);

        let nats = self.connect_nats(&url).await?;
        self.nats = Some(nats.clone());

        let streaming = self.connect_streaming(nats, identities).await?;
        self.streaming = Some(streaming);

        log_success(
            Component::StreamingServer,
            &format!("Streaming cluster '{}' up at {}", identities.cluster_id, url),
        );
        Ok(port)
    }

    fn write_tls_conf(&mut self, tls: &TlsMaterial) -> HarnessResult<PathBuf> {
        tls.validate_server()
            .map_err(|e| HarnessError::lifecycle(Component::NatsServer, format!("TLS config: {e}")))?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("nats-server.conf");
        std::fs::write(&path, render_nats_conf(tls))?;
        self.conf_dir = Some(dir);
        Ok(path)
    }

    async fn connect_nats(&self, url: &str) -> HarnessResult<Client> {
        let options = bypass_connect_options(self.startup_timeout, bypass_tls(self.tls.as_ref()));
        let client = options
            .connect(url)
            .await
            .map_err(|e| HarnessError::connectivity(url, e))?;
        component_debug!(Component::BypassNats, "🔗 Connected to {}", url);
        Ok(client)
    }

    /// The streaming server needs a moment after spawn before it answers
    /// discovery requests, so the handshake is retried until startup times out
    async fn connect_streaming(&mut self, nats: Client, identities: &Identities) -> HarnessResult<StreamingConnection> {
        let deadline = Instant::now() + self.startup_timeout;
        loop {
            let attempt = StreamingConnection::connect(
                nats.clone(),
                &identities.cluster_id,
                &identities.bypass_client_id,
                self.options.clone(),
            )
            .await;

            match attempt {
                Ok(connection) => return Ok(connection),
                Err(e) => {
                    let exited = self
                        .streaming_server
                        .as_mut()
                        .map_or(true, ManagedProcess::has_exited);
                    if exited {
                        return Err(HarnessError::lifecycle(
                            Component::StreamingServer,
                            "exited before accepting clients",
                        ));
                    }
                    if Instant::now() >= deadline {
                        return Err(e);
                    }
                    component_debug!(Component::BypassStreaming, "⏳ Streaming server not ready: {}", e);
                    tokio::time::sleep(READINESS_PROBE_INTERVAL).await;
                }
            }
        }
    }

    /// Shut down in reverse start order, recording each step in `teardown`.
    /// Absent handles are skipped, so this is safe after a partial start.
    pub async fn stop_into(&mut self, teardown: &mut Teardown) {
        match self.streaming.take() {
            Some(streaming) => teardown.record("bypass_streaming", streaming.close().await),
            None => teardown.skip("bypass_streaming"),
        }

        match self.nats.take() {
            Some(nats) => teardown.record(
                "bypass_nats",
                nats.flush()
                    .await
                    .map_err(|e| HarnessError::lifecycle(Component::BypassNats, e)),
            ),
            None => teardown.skip("bypass_nats"),
        }

        match self.streaming_server.take() {
            Some(process) => teardown.record("streaming_server", process.stop(DEFAULT_STOP_GRACE).await),
            None => teardown.skip("streaming_server"),
        }

        match self.nats_server.take() {
            Some(process) => teardown.record("nats_server", process.stop(DEFAULT_STOP_GRACE).await),
            None => teardown.skip("nats_server"),
        }

        self.nats_url = None;
        self.conf_dir = None;
    }

    pub async fn stop(&mut self) -> HarnessResult<()> {
        let mut teardown = Teardown::new(Component::StreamingServer);
        self.stop_into(&mut teardown).await;
        teardown.finish()
    }

    /// Stop then start again with the same identities. Stop failures are logged
    /// and do not prevent the new start.
    pub async fn restart(&mut self, port: Option<u16>, identities: &Identities) -> HarnessResult<u16> {
        if let Err(e) = self.stop().await {
            component_warn!(Component::StreamingServer, "⚠️ Restart continuing after stop failure: {}", e);
        }
        self.start(port.or(self.port), identities).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_scheme_follows_tls_flag() {
        assert_eq!(nats_url(false, 4222), "nats://localhost:4222");
        assert_eq!(nats_url(true, 4443), "tls://localhost:4443");
    }

    #[test]
    fn test_plain_bypass_has_no_tls() {
        assert_eq!(bypass_tls(None), None);
    }

    #[test]
    fn test_tls_bypass_presents_client_triple() {
        let tls = TlsMaterial::from_dir("/certs");
        let bypass = bypass_tls(Some(&tls)).unwrap();

        assert_eq!(bypass.root_ca, tls.ca_file);
        assert_eq!(bypass.client_cert, tls.client_cert);
        assert_eq!(bypass.client_key, tls.client_key);
        assert_ne!(bypass.client_cert, tls.server_cert);
    }

    #[test]
    fn test_plain_broker_args() {
        assert_eq!(nats_server_args(4222, None), ["-a", "127.0.0.1", "-p", "4222"]);
    }

    #[test]
    fn test_tls_broker_args_reference_conf() {
        let args = nats_server_args(4443, Some(Path::new("/tmp/x/nats-server.conf")));
        assert_eq!(&args[4..], ["-c", "/tmp/x/nats-server.conf"]);
    }

    #[test]
    fn test_tls_conf_contents() {
        let tls = TlsMaterial::from_dir("/certs");
        let conf = render_nats_conf(&tls);
        assert!(conf.contains("cert_file: \"/certs/server-cert.pem\""));
        assert!(conf.contains("key_file: \"/certs/server-key.pem\""));
        assert!(conf.contains("timeout: 5"));
    }

    #[test]
    fn test_streaming_args_without_tls() {
        let args = streaming_server_args("cluster1", "nats://localhost:4222", None);
        assert_eq!(args, ["-cid", "cluster1", "-ns", "nats://localhost:4222"]);
    }

    #[test]
    fn test_streaming_args_with_tls_use_client_triple() {
        let tls = TlsMaterial::from_dir("/certs");
        let args = streaming_server_args("cluster1", "tls://localhost:4443", Some(&tls));
        let joined = args.join(" ");
        assert!(joined.contains("--tls_client_cert /certs/client-cert.pem"));
        assert!(joined.contains("--tls_client_key /certs/client-key.pem"));
        assert!(joined.contains("--tls_client_cacert /certs/truststore.pem"));
    }

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port().unwrap();
        assert!(port > 0);
        assert!(TcpListener::bind((LISTEN_HOST, port)).is_ok());
    }

    #[tokio::test]
    async fn test_stop_before_start_skips_everything() {
        let mut cluster = StreamingCluster::new(&HarnessConfig::default(), false);
        let mut teardown = Teardown::new(Component::StreamingServer);
        cluster.stop_into(&mut teardown).await;

        assert_eq!(teardown.skipped().len(), 4);
        assert!(teardown.finish().is_ok());
        assert!(cluster.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_tls_start_fails_without_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let config = HarnessConfig::builder().cert_dir(dir.path()).build();
        let mut cluster = StreamingCluster::new(&config, true);

        let err = cluster.start(None, &Identities::generate()).await.unwrap_err();
        assert!(matches!(err, HarnessError::Lifecycle { component: Component::NatsServer, .. }));
        assert!(cluster.port().is_some());
        assert!(!cluster.is_running());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_start() {
        let config = HarnessConfig::builder()
            .nats_server_bin("/nonexistent/nats-server")
            .build();
        let mut cluster = StreamingCluster::new(&config, false);

        assert!(cluster.start(None, &Identities::generate()).await.is_err());
        assert!(cluster.stop().await.is_ok());
    }
}
