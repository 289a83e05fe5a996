//! Completion detection by polling the bridge's request counter
//!
//! The bridge exposes no completion events, so waiting means sampling its
//! counter on a fixed tick until it reaches a target or a deadline passes.
//! Timing out is an ordinary outcome here, reported as `false` / `None`.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant};

use shared::{component_debug, Component};

use crate::traits::RequestCounter;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct CompletionWaiter {
    counter: Arc<dyn RequestCounter>,
    timeout: Duration,
    poll_interval: Duration,
}

impl CompletionWaiter {
    pub fn new(counter: Arc<dyn RequestCounter>) -> Self {
        Self {
            counter,
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// True once the counter reaches `target`, false if the deadline passes first
    pub async fn wait_for_count(&self, target: i64) -> bool {
        let reached = self.spawn_poller(target).await.unwrap_or(false);
        component_debug!(Component::Waiter, "⏳ wait for {} requests: reached={}", target, reached);
        reached
    }

    /// Wait for both an externally delivered signal and the counter target.
    ///
    /// The signal is returned only when the counter also reached `target` before
    /// its deadline. A signal that arrives while the counter falls short is
    /// discarded, so "timed out" and "signalled too early" both yield `None`.
    pub async fn wait_for_signal<T>(&self, target: i64, mut signal: mpsc::Receiver<T>) -> Option<T>
    where
        T: Send + 'static,
    {
        let requests_ok = self.spawn_poller(target);
        let deadline = self.spawn_deadline();

        let received = tokio::select! {
            value = signal.recv() => value,
            _ = deadline => None,
        };

        let reached = requests_ok.await.unwrap_or(false);
        component_debug!(
            Component::Waiter,
            "⏳ wait for signal and {} requests: signalled={} reached={}",
            target,
            received.is_some(),
            reached
        );

        if reached {
            received
        } else {
            None
        }
    }

    /// Periodic counter check, resolved once with the outcome.
    ///
    /// Stops early if the receiver is dropped.
    fn spawn_poller(&self, target: i64) -> oneshot::Receiver<bool> {
        let (mut tx, rx) = oneshot::channel();
        let counter = Arc::clone(&self.counter);
        let period = self.poll_interval;
        let stop = Instant::now() + self.timeout;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = tx.closed() => return,
                    tick = ticker.tick() => {
                        if tick > stop {
                            let _ = tx.send(false);
                            return;
                        }
                        if counter.request_count() >= target {
                            let _ = tx.send(true);
                            return;
                        }
                    }
                }
            }
        });

        rx
    }

    /// Single-fire deadline
    fn spawn_deadline(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(());
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_counter_already_reached() {
        let counter = Arc::new(AtomicI64::new(5));
        let waiter = CompletionWaiter::new(counter);

        let start = Instant::now();
        assert!(waiter.wait_for_count(5).await);
        assert!(start.elapsed() <= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_never_reached() {
        let counter = Arc::new(AtomicI64::new(0));
        let waiter = CompletionWaiter::new(counter).with_timeout(Duration::from_secs(1));

        let start = Instant::now();
        assert!(!waiter.wait_for_count(1).await);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_incremented_concurrently() {
        let counter = Arc::new(AtomicI64::new(0));
        let waiter = CompletionWaiter::new(counter.clone());

        let bumper = counter.clone();
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(300)).await;
                bumper.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert!(waiter.wait_for_count(3).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_returned_when_counter_met() {
        let counter = Arc::new(AtomicI64::new(2));
        let waiter = CompletionWaiter::new(counter);
        let (tx, rx) = mpsc::channel(1);

        tx.send("done".to_string()).await.unwrap();
        assert_eq!(waiter.wait_for_signal(2, rx).await.as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_signal_yields_none() {
        let counter = Arc::new(AtomicI64::new(10));
        let waiter = CompletionWaiter::new(counter).with_timeout(Duration::from_millis(500));
        let (_tx, rx) = mpsc::channel::<String>(1);

        assert_eq!(waiter.wait_for_signal(1, rx).await, None);
    }
}
