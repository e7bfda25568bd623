//! Status monitor loop
//!
//! Polls a tool's status source on a fixed interval, compares each snapshot
//! with the last one it broadcast and notifies the tool's observable only on
//! change. The first tick establishes a baseline which is only replayed to
//! viewers that join later; it is never broadcast as a change.
//!
//! Sources whose negative answer can be a transient race (a tunnel that is
//! still coming up, a service mid-restart) may opt into a retry policy: a
//! negative snapshot is re-checked a few times before it is accepted.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::observe::Observable;

/// Produces status snapshots for a monitorable tool
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self) -> Value;
}

struct FnStatus<F>(F);

#[async_trait]
impl<F, Fut> StatusSource for FnStatus<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Value> + Send,
{
    async fn status(&self) -> Value {
        (self.0)().await
    }
}

/// Wrap an async function as a status source
pub fn status_fn<F, Fut>(f: F) -> Arc<dyn StatusSource>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    Arc::new(FnStatus(f))
}

struct BlockingStatus<F>(Arc<F>);

#[async_trait]
impl<F> StatusSource for BlockingStatus<F>
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    async fn status(&self) -> Value {
        let f = self.0.clone();
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(value) => value,
            Err(e) => {
                warn!("blocking status check failed: {e}");
                serde_json::json!({ "error": "status check failed" })
            }
        }
    }
}

/// Wrap a synchronous probe so it runs on the blocking pool and cannot stall
/// other monitor loops
pub fn blocking_status<F>(f: F) -> Arc<dyn StatusSource>
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    Arc::new(BlockingStatus(Arc::new(f)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-checks after the first negative answer
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(1),
        }
    }
}

type NegativePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// How a tool is monitored. Interval and retry policy fall back to the
/// monitor configuration when not set here.
#[derive(Clone)]
pub struct MonitorSpec {
    source: Arc<dyn StatusSource>,
    interval: Option<Duration>,
    negative: Option<NegativePredicate>,
    retry: Option<RetryPolicy>,
}

impl MonitorSpec {
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            interval: None,
            negative: None,
            retry: None,
        }
    }

    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Re-check snapshots matching `negative` before accepting them
    pub fn retry_when<P>(mut self, negative: P) -> Self
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.negative = Some(Arc::new(negative));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }
}

impl fmt::Debug for MonitorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorSpec")
            .field("interval", &self.interval)
            .field("retries_negative", &self.negative.is_some())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Unchanged,
    Changed,
    Terminated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// First snapshot of the loop; recorded without a notification
    Baseline(Value),
    Unchanged,
    Changed(Value),
}

/// Aborts a check still in flight when the loop abandons it
struct AbortOnDrop(tokio::task::AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct MonitorLoop {
    tool_id: String,
    source: Arc<dyn StatusSource>,
    interval: Duration,
    retry: Option<(NegativePredicate, RetryPolicy)>,
    last: Option<Value>,
    state: MonitorState,
}

impl MonitorLoop {
    pub fn new(tool_id: &str, spec: &MonitorSpec, config: &MonitorConfig) -> Self {
        let retry = spec
            .negative
            .clone()
            .map(|pred| (pred, spec.retry.unwrap_or_else(|| config.retry_policy())));

        Self {
            tool_id: tool_id.to_string(),
            source: spec.source.clone(),
            interval: spec.interval.unwrap_or_else(|| config.interval()),
            retry,
            last: None,
            state: MonitorState::Idle,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_snapshot(&self) -> Option<&Value> {
        self.last.as_ref()
    }

    /// One status check, including re-checks of negative answers
    pub async fn check(&self) -> Value {
        let mut snapshot = self.poll_source().await;

        if let Some((negative, policy)) = &self.retry {
            let mut attempt = 0;
            while attempt < policy.retries && negative(&snapshot) {
                attempt += 1;
                debug!(
                    "{}: negative status, re-checking ({attempt}/{})",
                    self.tool_id, policy.retries
                );
                tokio::time::sleep(policy.delay).await;
                snapshot = self.poll_source().await;
            }
        }

        snapshot
    }

    /// Query the source on its own task so a panicking source becomes an
    /// error snapshot instead of taking the loop down
    async fn poll_source(&self) -> Value {
        let source = self.source.clone();
        let handle = tokio::spawn(async move { source.status().await });
        let _abort = AbortOnDrop(handle.abort_handle());

        match handle.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{}: status source failed: {e}", self.tool_id);
                serde_json::json!({ "error": "status check failed" })
            }
        }
    }

    /// Poll once and diff against the last broadcast snapshot
    pub async fn tick(&mut self) -> TickOutcome {
        self.state = MonitorState::Polling;
        let snapshot = self.check().await;

        match &self.last {
            None => {
                self.last = Some(snapshot.clone());
                self.state = MonitorState::Unchanged;
                TickOutcome::Baseline(snapshot)
            }
            Some(previous) if *previous == snapshot => {
                self.state = MonitorState::Unchanged;
                TickOutcome::Unchanged
            }
            Some(_) => {
                self.last = Some(snapshot.clone());
                self.state = MonitorState::Changed;
                TickOutcome::Changed(snapshot)
            }
        }
    }

    /// Drive the loop until cancelled or until the observable loses its
    /// last observer. A check in flight is abandoned on termination.
    pub async fn run(mut self, observable: Arc<Observable>, cancel: CancellationToken) -> Self {
        info!(
            "Monitor started: {} (every {:?})",
            self.tool_id, self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = observable.closed() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = observable.closed() => break,
                outcome = self.tick() => outcome,
            };

            match outcome {
                TickOutcome::Baseline(snapshot) => observable.seed(snapshot),
                TickOutcome::Changed(snapshot) => {
                    let report = observable.notify(snapshot);
                    debug!(
                        "{}: change delivered to {} observer(s), {} failed",
                        self.tool_id,
                        report.delivered,
                        report.failed()
                    );
                }
                TickOutcome::Unchanged => {}
            }
        }

        self.state = MonitorState::Terminated;
        info!("Monitor stopped: {}", self.tool_id);
        self
    }
}
