//! Process-wide tuning knobs.
//!
//! Every field has a documented default matching the source; all overrides
//! are optional environment variables (the system has no *required*
//! configuration, per spec).

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of order-book shards.
    pub shard_count: usize,
    /// Number of event loops in the pool. Defaults to hardware parallelism.
    pub event_loop_count: usize,
    /// Bloom filter size in bits.
    pub bloom_bits: usize,
    /// Number of Bloom hash functions.
    pub bloom_hashes: usize,
    /// Bounded LRU fingerprint cache size.
    pub dedup_lru_capacity: usize,
    /// Inserts between Bloom filter rotations.
    pub bloom_rotate_interval: u64,
    /// Hard cap on the in-flight message pipeline.
    pub pipeline_cap: usize,
    /// Circuit breaker consecutive-failure threshold.
    pub circuit_breaker_threshold: u32,
    /// Circuit breaker open-state cooldown.
    pub circuit_breaker_reset_timeout: Duration,
    /// Push-stream host:port.
    pub push_host: String,
    /// Pull-stream host.
    pub pull_host: String,
    /// Duration a push connection must stay `Ready` before its reconnect
    /// attempt counter resets to zero.
    pub reconnect_reset_after: Duration,
    /// Network operation deadline.
    pub io_deadline: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: 16,
            event_loop_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            bloom_bits: 100_000,
            bloom_hashes: 5,
            dedup_lru_capacity: 1_000,
            bloom_rotate_interval: 1_000_000,
            pipeline_cap: 1_000_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_timeout: Duration::from_secs(30),
            push_host: "stream.binance.com:9443".to_string(),
            pull_host: "api.binance.com".to_string(),
            reconnect_reset_after: Duration::from_secs(60),
            io_deadline: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Builds a `Config` from defaults, applying any of the recognized
    /// `CENAYANG_*` environment overrides found.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_usize("CENAYANG_SHARD_COUNT") {
            cfg.shard_count = v;
        }
        if let Some(v) = env_usize("CENAYANG_EVENT_LOOP_COUNT") {
            cfg.event_loop_count = v;
        }
        if let Some(v) = env_usize("CENAYANG_PIPELINE_CAP") {
            cfg.pipeline_cap = v;
        }
        if let Some(v) = env_usize("CENAYANG_DEDUP_LRU_CAPACITY") {
            cfg.dedup_lru_capacity = v;
        }
        if let Ok(v) = env::var("CENAYANG_PUSH_HOST") {
            cfg.push_host = v;
        }
        if let Ok(v) = env::var("CENAYANG_PULL_HOST") {
            cfg.pull_host = v;
        }
        cfg
    }
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
