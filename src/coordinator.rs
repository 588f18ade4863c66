//! Coordinator: owns the event-loop pool, the message pipeline, the
//! order-book store, and the live set of push/pull handlers. This is the
//! engine's top-level control surface — `main.rs`'s command shell talks to
//! a single `Coordinator`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::event_loop::{EventLoop, EventLoopPool};
use crate::metrics::Metrics;
use crate::orderbook::{OrderbookStore, Symbol};
use crate::pipeline::Pipeline;
use crate::pull::{AdaptivePollingPolicy, PollingPolicy, PullHandler};
use crate::push::PushHandler;

pub struct Coordinator {
    config: Config,
    pool: EventLoopPool,
    market_data_loop: Arc<EventLoop>,
    pipeline: Arc<Pipeline>,
    store: Arc<OrderbookStore>,
    metrics: Metrics,
    polling_policy: Arc<dyn PollingPolicy>,
    push_handlers: RwLock<HashMap<Symbol, Arc<PushHandler>>>,
    pull_handlers: RwLock<HashMap<Symbol, Arc<PullHandler>>>,
}

impl Coordinator {
    /// Fails only on lifecycle errors — currently, the event-loop pool
    /// failing to spin up its OS threads. Per-symbol connection failures
    /// never reach this far; they are handled locally by each handler.
    pub fn new(config: Config) -> Result<Self> {
        let metrics = Metrics::new();
        let store = Arc::new(OrderbookStore::new(config.shard_count));
        let pool = EventLoopPool::new(config.event_loop_count.max(1))?;
        // The pipeline consumer is the "dedicated market-data loop" spec
        // calls for — its own loop, never drawn from the pool symbol
        // handlers are placed on.
        let market_data_loop = Arc::new(EventLoop::new(config.event_loop_count.max(1))?);
        let pipeline = Arc::new(Pipeline::new(
            config.pipeline_cap,
            config.bloom_bits,
            config.bloom_hashes,
            config.dedup_lru_capacity,
            config.bloom_rotate_interval,
            store.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            pool,
            market_data_loop,
            pipeline,
            store,
            metrics,
            polling_policy: Arc::new(AdaptivePollingPolicy),
            push_handlers: RwLock::new(HashMap::new()),
            pull_handlers: RwLock::new(HashMap::new()),
        })
    }

    /// Starts the event-loop pool, the dedicated market-data loop, and the
    /// pipeline's consumer task on the latter. Call once before
    /// `add_symbol`.
    pub fn start(&self) {
        self.pool.run();
        self.market_data_loop.run();
        self.pipeline.clone().spawn_consumer(self.market_data_loop.handle());
        info!(
            loops = self.pool.size(),
            "coordinator started market-data pipeline"
        );
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    /// Subscribes to a symbol: spins up one push handler and one pull
    /// handler, both placed on `hash(symbol) mod E` — the pool loop that
    /// owns this symbol's connections for as long as it stays subscribed.
    /// Idempotent — re-adding an already-tracked symbol is a no-op.
    pub fn add_symbol(&self, symbol: impl Into<Symbol>) {
        let symbol: Symbol = symbol.into();

        if self.push_handlers.read().contains_key(&symbol) {
            return;
        }

        let home_loop = self.pool.loop_for_symbol(&symbol);

        let push = Arc::new(PushHandler::new(
            symbol.clone(),
            self.config.push_host.clone(),
            self.pipeline.clone(),
            self.metrics.clone(),
            self.config.reconnect_reset_after,
            None,
            self.config.io_deadline,
        ));
        push.connect(home_loop.handle());
        self.push_handlers.write().insert(symbol.clone(), push);

        let pull = Arc::new(PullHandler::new(
            symbol.clone(),
            self.config.pull_host.clone(),
            self.pipeline.clone(),
            self.metrics.clone(),
            self.config.circuit_breaker_threshold,
            self.config.circuit_breaker_reset_timeout,
            self.config.io_deadline,
            self.polling_policy.clone(),
        ));
        pull.clone().spawn(home_loop.handle());
        self.pull_handlers.write().insert(symbol.clone(), pull);

        info!(symbol = %symbol, loop_id = home_loop.id(), "symbol subscribed");
    }

    /// Unsubscribes a symbol, stopping both of its handlers. The book state
    /// already accumulated in the store is left in place.
    pub fn remove_symbol(&self, symbol: &Symbol) {
        if let Some(push) = self.push_handlers.write().remove(symbol) {
            push.stop();
        }
        if let Some(pull) = self.pull_handlers.write().remove(symbol) {
            pull.stop();
        }
        info!(symbol = %symbol, "symbol unsubscribed");
    }

    pub fn active_symbols(&self) -> Vec<Symbol> {
        self.push_handlers.read().keys().cloned().collect()
    }

    /// Depth-truncated JSON snapshot for a symbol, `"{}"` if unseen.
    pub fn snapshot(&self, symbol: &Symbol, depth: usize) -> String {
        self.store.snapshot(symbol, depth)
    }

    /// Stops every handler, the pipeline consumer, then the event-loop pool
    /// and the dedicated market-data loop.
    pub fn stop(&self) {
        for symbol in self.active_symbols() {
            self.remove_symbol(&symbol);
        }
        self.pipeline.stop();
        self.pool.stop();
        self.market_data_loop.stop();
        info!("coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            event_loop_count: 2,
            shard_count: 4,
            ..Config::default()
        }
    }

    #[test]
    fn add_symbol_is_idempotent_and_tracked() {
        let coordinator = Coordinator::new(test_config()).unwrap();
        coordinator.start();
        coordinator.add_symbol("BTCUSDT");
        coordinator.add_symbol("BTCUSDT");
        assert_eq!(coordinator.active_symbols().len(), 1);
        coordinator.stop();
    }

    #[test]
    fn remove_symbol_clears_tracking() {
        let coordinator = Coordinator::new(test_config()).unwrap();
        coordinator.start();
        coordinator.add_symbol("ETHUSDT");
        coordinator.remove_symbol(&Symbol::from("ETHUSDT"));
        assert!(coordinator.active_symbols().is_empty());
        coordinator.stop();
    }

    #[test]
    fn snapshot_of_unknown_symbol_is_empty_object() {
        let coordinator = Coordinator::new(test_config()).unwrap();
        assert_eq!(coordinator.snapshot(&Symbol::from("DOGEUSDT"), 10), "{}");
    }
}
