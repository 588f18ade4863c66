//! A cheap, cloneable metrics handle.
//!
//! Passed into constructors rather than reached for as a global singleton
//! (the source's process-wide `prometheus::Registry` is the thing being
//! replaced here — see the "Global metrics registry" re-architecture note).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Counters {
    messages_processed: AtomicU64,
    messages_deduplicated: AtomicU64,
    messages_dropped: AtomicU64,
    parse_errors: AtomicU64,
    reconnects: AtomicU64,
    circuit_trips: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct Metrics(Arc<Counters>);

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_messages_processed(&self) {
        self.0.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_deduplicated(&self) {
        self.0.messages_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_messages_dropped(&self) {
        self.0.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_parse_errors(&self) {
        self.0.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnects(&self) {
        self.0.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_circuit_trips(&self) {
        self.0.circuit_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_processed: self.0.messages_processed.load(Ordering::Relaxed),
            messages_deduplicated: self.0.messages_deduplicated.load(Ordering::Relaxed),
            messages_dropped: self.0.messages_dropped.load(Ordering::Relaxed),
            parse_errors: self.0.parse_errors.load(Ordering::Relaxed),
            reconnects: self.0.reconnects.load(Ordering::Relaxed),
            circuit_trips: self.0.circuit_trips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub messages_deduplicated: u64,
    pub messages_dropped: u64,
    pub parse_errors: u64,
    pub reconnects: u64,
    pub circuit_trips: u64,
}
