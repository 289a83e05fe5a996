//! Test helpers: a stub bridge whose request count follows a schedule
//! driven by tokio's clock

use async_trait::async_trait;
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use bridge_harness::{Bridge, BridgeStats, HarnessConfig, HarnessError, HarnessResult, RequestCounter};
use shared::BridgeConfig;

/// Request count that steps up at fixed offsets from creation
pub struct ScheduledCounter {
    origin: Instant,
    steps: Vec<(Duration, i64)>,
}

impl ScheduledCounter {
    pub fn new(steps: Vec<(Duration, i64)>) -> Self {
        Self {
            origin: Instant::now(),
            steps,
        }
    }

    /// Count jumps to `count` at `at`
    pub fn reaching(count: i64, at: Duration) -> Self {
        Self::new(vec![(at, count)])
    }
}

impl RequestCounter for ScheduledCounter {
    fn request_count(&self) -> i64 {
        let elapsed = self.origin.elapsed();
        self.steps
            .iter()
            .filter(|(at, _)| elapsed >= *at)
            .map(|(_, count)| *count)
            .max()
            .unwrap_or(0)
    }
}

/// Bridge stand-in that records lifecycle calls
pub struct StubBridge {
    counter: ScheduledCounter,
    fail_initialize: bool,
    fail_start: bool,
    pub initialize_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub last_config: Mutex<Option<BridgeConfig>>,
}

impl StubBridge {
    pub fn new(counter: ScheduledCounter) -> Self {
        Self {
            counter,
            fail_initialize: false,
            fail_start: false,
            initialize_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            last_config: Mutex::new(None),
        }
    }

    pub fn idle() -> Self {
        Self::new(ScheduledCounter::new(Vec::new()))
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::idle()
        }
    }

    pub fn failing_initialize() -> Self {
        Self {
            fail_initialize: true,
            ..Self::idle()
        }
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.initialize_calls.load(Ordering::SeqCst),
            self.start_calls.load(Ordering::SeqCst),
            self.stop_calls.load(Ordering::SeqCst),
        )
    }
}

#[async_trait]
impl Bridge for StubBridge {
    async fn initialize_from_config(&self, config: BridgeConfig) -> HarnessResult<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock().unwrap() = Some(config);
        if self.fail_initialize {
            return Err(HarnessError::config("connect[0].topic"));
        }
        Ok(())
    }

    async fn start(&self) -> HarnessResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(HarnessError::lifecycle(shared::Component::Bridge, "listener refused"));
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn safe_stats(&self) -> BridgeStats {
        BridgeStats {
            request_count: self.counter.request_count(),
        }
    }
}

pub struct TestHelpers;

impl TestHelpers {
    /// Loopback port with nothing listening on it
    pub fn closed_port() -> u16 {
        TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
    }

    /// Configuration whose queue broker can never be reached
    pub fn unreachable_config() -> HarnessConfig {
        let addr = format!("127.0.0.1:{}", Self::closed_port());
        HarnessConfig::builder()
            .kafka_host_port(addr.clone())
            .kafka_tls_host_port(addr)
            .operation_timeout(Duration::from_millis(300))
            .build()
    }

    /// Configuration for the live suites, honoring `BRIDGE_HARNESS_*` overrides
    pub fn live_config() -> HarnessConfig {
        shared::logging::init_test_tracing();
        HarnessConfig::from_env()
    }
}
