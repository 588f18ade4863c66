//! Pull-stream handler: polls a REST snapshot endpoint on an adaptive
//! interval, paced by a token bucket and guarded by a circuit breaker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::IngestError;
use crate::metrics::Metrics;
use crate::orderbook::Symbol;
use crate::pipeline::{Message as PipelineMessage, Origin, Pipeline};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(5_000);
const START_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Fixed reschedule delay when the token bucket or circuit breaker denies a
/// cycle — independent of `current_interval`, per spec §4.8 step 1.
const DENIED_RESCHEDULE_DELAY: Duration = MIN_POLL_INTERVAL;

/// Governs when a pull handler's polling interval adapts to poll outcomes.
/// Spec reserves this decision for the coordinator: the handler exposes
/// only the raw knobs (`increase_interval`/`decrease_interval`) and defers
/// to whatever policy the coordinator hands it at construction time.
pub trait PollingPolicy: Send + Sync {
    fn on_success(&self, handler: &PullHandler);
    fn on_failure(&self, handler: &PullHandler);
}

/// The coordinator's default policy: halve the interval after a success,
/// double it after a failure — the spec's halve/double knobs, invoked from
/// outside the handler rather than decided by it.
pub struct AdaptivePollingPolicy;

impl PollingPolicy for AdaptivePollingPolicy {
    fn on_success(&self, handler: &PullHandler) {
        handler.decrease_interval();
    }

    fn on_failure(&self, handler: &PullHandler) {
        handler.increase_interval();
    }
}

/// Single-token bucket: at most one request admitted per refill period.
struct TokenBucket {
    tokens: Mutex<f64>,
    max_tokens: f64,
    refill_per_sec: f64,
    last_refill: Mutex<Instant>,
}

impl TokenBucket {
    fn new(max_tokens: f64, refill_per_sec: f64) -> Self {
        Self {
            tokens: Mutex::new(max_tokens),
            max_tokens,
            refill_per_sec,
            last_refill: Mutex::new(Instant::now()),
        }
    }

    fn try_acquire(&self) -> bool {
        let mut last = self.last_refill.lock();
        let elapsed = last.elapsed().as_secs_f64();
        *last = Instant::now();

        let mut tokens = self.tokens.lock();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct PullHandler {
    symbol: Symbol,
    base_url: String,
    client: reqwest::Client,
    bucket: TokenBucket,
    breaker: CircuitBreaker,
    interval_ms: AtomicU64,
    running: std::sync::atomic::AtomicBool,
    pipeline: Arc<Pipeline>,
    metrics: Metrics,
    policy: Arc<dyn PollingPolicy>,
}

impl PullHandler {
    pub fn new(
        symbol: Symbol,
        base_url: impl Into<String>,
        pipeline: Arc<Pipeline>,
        metrics: Metrics,
        circuit_breaker_threshold: u32,
        circuit_breaker_reset_timeout: Duration,
        io_deadline: Duration,
        policy: Arc<dyn PollingPolicy>,
    ) -> Self {
        Self {
            symbol,
            base_url: base_url.into(),
            client: reqwest::Client::builder()
                .timeout(io_deadline)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            bucket: TokenBucket::new(1.0, 1.0),
            breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_reset_timeout),
            interval_ms: AtomicU64::new(START_POLL_INTERVAL.as_millis() as u64),
            running: std::sync::atomic::AtomicBool::new(false),
            pipeline,
            metrics,
            policy,
        }
    }

    pub fn current_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub fn spawn(self: Arc<Self>, handle: &tokio::runtime::Handle) {
        self.running.store(true, Ordering::Release);
        let handler = self.clone();
        handle.spawn(async move { handler.run().await });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// One cycle per iteration: check the token bucket and circuit breaker
    /// first; either denying reschedules after a fixed 100 ms without
    /// resolving anything. Only once both admit does the handler poll, then
    /// reports the outcome to `policy` and sleeps `current_interval` before
    /// the next cycle.
    async fn run(&self) {
        while self.running.load(Ordering::Acquire) {
            if !self.bucket.try_acquire() {
                tokio::time::sleep(DENIED_RESCHEDULE_DELAY).await;
                continue;
            }

            if !self.breaker.allow_request() {
                let denial = IngestError::CircuitOpen;
                debug!(symbol = %self.symbol, error = %denial, "skipping poll");
                tokio::time::sleep(DENIED_RESCHEDULE_DELAY).await;
                continue;
            }

            match self.poll_once().await {
                Ok(payload) => {
                    self.breaker.record_success();
                    self.policy.on_success(self);
                    self.pipeline.add_message(PipelineMessage {
                        origin: Origin::Pull,
                        symbol: self.symbol.clone(),
                        payload,
                    });
                }
                Err(e) => {
                    if self.breaker.record_failure() {
                        self.metrics.inc_circuit_trips();
                    }
                    self.policy.on_failure(self);
                    let err = IngestError::Http(e);
                    warn!(symbol = %self.symbol, error = %err, "pull poll failed");
                }
            }

            tokio::time::sleep(self.current_interval()).await;
        }
    }

    async fn poll_once(&self) -> Result<Vec<u8>, reqwest::Error> {
        let url = format!(
            "https://{}/api/v3/depth?symbol={}",
            self.base_url,
            self.symbol.as_str()
        );
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Success halves the interval (more aggressive polling while healthy),
    /// floored at `MIN_POLL_INTERVAL`. Public knob; the decision to call it
    /// belongs to whatever `PollingPolicy` the handler was built with.
    pub fn decrease_interval(&self) {
        let current = self.interval_ms.load(Ordering::Acquire);
        let next = (current / 2).max(MIN_POLL_INTERVAL.as_millis() as u64);
        self.interval_ms.store(next, Ordering::Release);
    }

    /// Failure doubles the interval, capped at `MAX_POLL_INTERVAL`. Public
    /// knob; see `decrease_interval`.
    pub fn increase_interval(&self) {
        let current = self.interval_ms.load(Ordering::Acquire);
        let next = (current * 2).min(MAX_POLL_INTERVAL.as_millis() as u64);
        self.interval_ms.store(next, Ordering::Release);
    }
}
