//! Integration tests exercising the literal end-to-end scenarios from the
//! ingestion engine's testable-properties scenarios: fresh apply, deletion,
//! dedup suppression, unknown-symbol snapshot, circuit-breaker trip, and
//! pipeline back-pressure shedding.

use std::sync::Arc;
use std::time::Duration;

use cenayang_ingest::circuit_breaker::CircuitBreaker;
use cenayang_ingest::coordinator::Coordinator;
use cenayang_ingest::metrics::Metrics;
use cenayang_ingest::orderbook::{OrderbookStore, Symbol};
use cenayang_ingest::pipeline::{Message, Origin, Pipeline};
use cenayang_ingest::Config;

fn test_pipeline(cap: usize) -> (Arc<Pipeline>, Arc<OrderbookStore>, Metrics) {
    let store = Arc::new(OrderbookStore::new(16));
    let metrics = Metrics::new();
    let pipeline = Arc::new(Pipeline::new(
        cap,
        100_000,
        5,
        1_000,
        1_000_000,
        store.clone(),
        metrics.clone(),
    ));
    (pipeline, store, metrics)
}

#[test]
fn scenario_1_fresh_apply_sorts_each_side() {
    let (pipeline, store, _metrics) = test_pipeline(1_000);
    pipeline.add_message(Message {
        origin: Origin::Push,
        symbol: Symbol::from("BTCUSDT"),
        payload: br#"{"bids":[["10000.00","1.0"],["9999.99","1.0"]],"asks":[["10000.01","1.0"],["10000.02","1.0"]]}"#.to_vec(),
    });
    pipeline.drain_ready();

    let snap = store.snapshot(&Symbol::from("BTCUSDT"), 2);
    let value: serde_json::Value = serde_json::from_str(&snap).unwrap();
    assert_eq!(value["bids"][0][0], "10000");
    assert_eq!(value["bids"][1][0], "9999.99");
    assert_eq!(value["asks"][0][0], "10000.01");
    assert_eq!(value["asks"][1][0], "10000.02");
}

#[test]
fn scenario_2_zero_quantity_deletes_level() {
    let (pipeline, store, _metrics) = test_pipeline(1_000);
    let symbol = Symbol::from("BTCUSDT");
    pipeline.add_message(Message {
        origin: Origin::Push,
        symbol: symbol.clone(),
        payload: br#"{"bids":[["10000.00","1.0"],["9999.99","1.0"]],"asks":[["10000.01","1.0"],["10000.02","1.0"]]}"#.to_vec(),
    });
    pipeline.drain_ready();

    pipeline.add_message(Message {
        origin: Origin::Push,
        symbol: symbol.clone(),
        payload: br#"{"bids":[["10000.00","0"]]}"#.to_vec(),
    });
    pipeline.drain_ready();

    let snap = store.snapshot(&symbol, 2);
    let value: serde_json::Value = serde_json::from_str(&snap).unwrap();
    let bids = value["bids"].as_array().unwrap();
    assert_eq!(bids.len(), 1);
    assert_eq!(bids[0][0], "9999.99");
}

#[test]
fn scenario_3_duplicate_suppression_applies_once() {
    let (pipeline, _store, metrics) = test_pipeline(1_000);
    let payload = br#"{"bids":[["1.0","1.0"]],"asks":[]}"#.to_vec();
    for _ in 0..2 {
        pipeline.add_message(Message {
            origin: Origin::Push,
            symbol: Symbol::from("BTCUSDT"),
            payload: payload.clone(),
        });
    }
    pipeline.drain_ready();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.messages_processed, 1);
    assert_eq!(snapshot.messages_deduplicated, 1);
}

#[test]
fn scenario_4_unknown_symbol_snapshot_is_empty_object() {
    let store = OrderbookStore::new(16);
    assert_eq!(store.snapshot(&Symbol::from("DOGEUSDT"), 5), "{}");
}

#[test]
fn scenario_5_circuit_breaker_trips_then_half_opens_then_closes() {
    let breaker = CircuitBreaker::new(3, Duration::from_millis(100));
    for _ in 0..3 {
        breaker.record_failure();
    }
    assert!(!breaker.allow_request());

    std::thread::sleep(Duration::from_millis(110));
    assert!(breaker.allow_request());

    breaker.record_success();
    assert!(breaker.allow_request());
}

#[test]
fn scenario_6_back_pressure_sheds_above_cap() {
    let (pipeline, _store, metrics) = test_pipeline(10);
    for i in 0..15 {
        pipeline.add_message(Message {
            origin: Origin::Push,
            symbol: Symbol::from("BTCUSDT"),
            payload: format!("{{\"n\":{i}}}").into_bytes(),
        });
    }
    assert_eq!(pipeline.queue_len(), 10);
    assert_eq!(metrics.snapshot().messages_dropped, 5);
}

#[tokio::test]
async fn coordinator_lifecycle_add_remove_and_snapshot() {
    let config = Config {
        event_loop_count: 2,
        shard_count: 4,
        ..Config::default()
    };
    let coordinator = Coordinator::new(config).expect("coordinator should start");
    coordinator.start();

    coordinator.add_symbol("BTCUSDT");
    coordinator.add_symbol("ETHUSDT");
    let mut symbols: Vec<String> = coordinator
        .active_symbols()
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();
    symbols.sort();
    assert_eq!(symbols, vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

    assert_eq!(coordinator.snapshot(&Symbol::from("DOGEUSDT"), 5), "{}");

    coordinator.remove_symbol(&Symbol::from("BTCUSDT"));
    let symbols = coordinator.active_symbols();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].as_str(), "ETHUSDT");

    coordinator.stop();
}
