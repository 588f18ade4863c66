//! Back-pressured message pipeline: dedup -> parse -> dispatch to the
//! order-book store. Single consumer, many producers (the push/pull
//! handlers), per spec's MPSC discipline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::dedup::Deduplicator;
use crate::error::IngestError;
use crate::orderbook::{OrderbookStore, PriceLevel, Symbol};
use crate::queue::MpmcQueue;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Push,
    Pull,
}

pub struct Message {
    pub origin: Origin,
    pub symbol: Symbol,
    pub payload: Vec<u8>,
}

pub struct Pipeline {
    queue: MpmcQueue<Message>,
    cap: usize,
    dedup: Deduplicator,
    store: Arc<OrderbookStore>,
    metrics: Metrics,
    running: AtomicBool,
}

impl Pipeline {
    pub fn new(
        cap: usize,
        bloom_bits: usize,
        bloom_hashes: usize,
        dedup_lru_capacity: usize,
        bloom_rotate_interval: u64,
        store: Arc<OrderbookStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            queue: MpmcQueue::new(),
            cap,
            dedup: Deduplicator::with_rotation(
                bloom_bits,
                bloom_hashes,
                dedup_lru_capacity,
                bloom_rotate_interval,
            ),
            store,
            metrics,
            running: AtomicBool::new(false),
        }
    }

    /// Pushes a message unless the hard cap is exceeded, in which case the
    /// message is shed and a drop counter is incremented — back-pressure
    /// by shedding rather than blocking producers.
    pub fn add_message(&self, message: Message) {
        if self.queue.len() >= self.cap {
            self.metrics.inc_messages_dropped();
            let err = IngestError::QueueFull;
            warn!(cap = self.cap, error = %err, "dropping message");
            return;
        }
        self.queue.push(message);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Drains every message ready right now, then returns — callers yield
    /// back to their event loop between calls so the pipeline never
    /// starves other work on the loop it runs on.
    pub fn drain_ready(&self) {
        while let Some(message) = self.queue.pop() {
            self.process(message);
        }
    }

    fn process(&self, message: Message) {
        if self.dedup.is_duplicate(&message.payload) {
            self.metrics.inc_messages_deduplicated();
            return;
        }

        let doc: serde_json::Value = match serde_json::from_slice(&message.payload) {
            Ok(v) => v,
            Err(e) => {
                self.metrics.inc_parse_errors();
                let err = IngestError::Parse(e.to_string());
                warn!(error = %err, "failed to parse depth payload as JSON");
                return;
            }
        };

        let bids = parse_side(doc.get("bids"), &self.metrics);
        let asks = parse_side(doc.get("asks"), &self.metrics);

        self.store.apply_update(&message.symbol, &bids, &asks);
        self.metrics.inc_messages_processed();
    }

    /// Spawns the dedicated consumer task onto the market-data event loop's
    /// runtime. Returns once `stop` clears the running flag.
    pub fn spawn_consumer(self: Arc<Self>, handle: &tokio::runtime::Handle) {
        self.running.store(true, Ordering::Release);
        let pipeline = self.clone();
        handle.spawn(async move {
            while pipeline.running.load(Ordering::Acquire) {
                pipeline.drain_ready();
                if pipeline.queue.is_empty() {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Extracts `["<price>", "<qty>"]` pairs from a side array. A missing or
/// malformed side is skipped (counted), not a hard failure for the whole
/// message.
fn parse_side(side: Option<&serde_json::Value>, metrics: &Metrics) -> Vec<PriceLevel> {
    let Some(array) = side.and_then(|v| v.as_array()) else {
        metrics.inc_parse_errors();
        let err = IngestError::Parse("missing or malformed bids/asks array".to_string());
        debug!(error = %err, "skipping side");
        return Vec::new();
    };

    array
        .iter()
        .filter_map(|entry| {
            let pair = entry.as_array()?;
            let price: f64 = pair.first()?.as_str()?.parse().ok()?;
            let quantity: f64 = pair.get(1)?.as_str()?.parse().ok()?;
            Some(PriceLevel { price, quantity })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(cap: usize) -> Arc<Pipeline> {
        Arc::new(Pipeline::new(
            cap,
            10_000,
            5,
            1_000,
            1_000_000,
            Arc::new(OrderbookStore::new(4)),
            Metrics::new(),
        ))
    }

    #[test]
    fn back_pressure_sheds_above_cap() {
        let p = pipeline(10);
        for i in 0..15 {
            p.add_message(Message {
                origin: Origin::Push,
                symbol: Symbol::from("BTCUSDT"),
                payload: format!("{{\"n\":{i}}}").into_bytes(),
            });
        }
        assert_eq!(p.queue_len(), 10);
        assert_eq!(p.metrics.snapshot().messages_dropped, 5);
    }

    #[test]
    fn duplicate_payload_applied_once() {
        let p = pipeline(1_000);
        let payload = br#"{"bids":[["1.0","1.0"]],"asks":[]}"#.to_vec();
        for _ in 0..3 {
            p.add_message(Message {
                origin: Origin::Push,
                symbol: Symbol::from("BTCUSDT"),
                payload: payload.clone(),
            });
        }
        p.drain_ready();
        assert_eq!(p.metrics.snapshot().messages_processed, 1);
        assert_eq!(p.metrics.snapshot().messages_deduplicated, 2);
    }

    #[test]
    fn symbol_is_threaded_through_to_the_correct_book() {
        let p = pipeline(1_000);
        p.add_message(Message {
            origin: Origin::Pull,
            symbol: Symbol::from("ETHUSDT"),
            payload: br#"{"bids":[["100.0","1.0"]],"asks":[]}"#.to_vec(),
        });
        p.drain_ready();
        let snap = p.store.snapshot(&Symbol::from("ETHUSDT"), 5);
        assert_ne!(snap, "{}");
        let other = p.store.snapshot(&Symbol::from("BTCUSDT"), 5);
        assert_eq!(other, "{}");
    }

    #[test]
    fn missing_side_is_skipped_not_fatal() {
        let p = pipeline(1_000);
        p.add_message(Message {
            origin: Origin::Push,
            symbol: Symbol::from("BTCUSDT"),
            payload: br#"{"bids":[["100.0","1.0"]]}"#.to_vec(),
        });
        p.drain_ready();
        assert_eq!(p.metrics.snapshot().messages_processed, 1);
        assert_eq!(p.metrics.snapshot().parse_errors, 1);
    }
}
