//! Sharded order-book store: symbol -> book, incremental merge semantics,
//! depth-truncated JSON snapshot emission.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

/// An opaque, case-sensitive routing key. Cheap to clone (backed by
/// `Arc<str>`) since it is threaded through every message and task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol(Arc::from(s))
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol(Arc::from(s.as_str()))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One (price, quantity) entry. `quantity == 0.0` is the merge protocol's
/// spelling of "remove this price level" and never persists in a `Book`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

/// A symbol's current best-known bids (descending) and asks (ascending).
/// No duplicate prices within a side; no zero-quantity level survives.
#[derive(Debug, Clone)]
pub struct Book {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub last_update: Instant,
}

impl Book {
    fn new() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            last_update: Instant::now(),
        }
    }
}

/// Bit-exact float equality is the merge-matching rule the source uses
/// (`level.price == u.price`). A fixed-point or decimal-string keyed
/// representation would avoid float-equality pitfalls, but this rewrite
/// keeps the source's semantics rather than silently changing numeric
/// behavior the spec does not ask for — see DESIGN.md.
fn merge_side(existing: &mut Vec<PriceLevel>, updates: &[PriceLevel], descending: bool) {
    for update in updates {
        match existing.iter_mut().find(|level| level.price == update.price) {
            Some(level) => {
                if update.quantity == 0.0 {
                    let price = level.price;
                    existing.retain(|l| l.price != price);
                } else {
                    level.quantity = update.quantity;
                }
            }
            None => {
                if update.quantity != 0.0 {
                    existing.push(*update);
                }
            }
        }
    }
    existing.retain(|level| level.quantity != 0.0);
    if descending {
        existing.sort_by(|a, b| b.price.partial_cmp(&a.price).unwrap_or(std::cmp::Ordering::Equal));
    } else {
        existing.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
    }
}

#[derive(Serialize)]
struct SnapshotDoc {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

pub struct OrderbookStore {
    shards: Vec<RwLock<HashMap<Symbol, Book>>>,
}

impl OrderbookStore {
    pub fn new(shard_count: usize) -> Self {
        let mut shards = Vec::with_capacity(shard_count.max(1));
        for _ in 0..shard_count.max(1) {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard_index(&self, symbol: &Symbol) -> usize {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Merges `bids`/`asks` updates into the symbol's book, creating it if
    /// absent. See `merge_side` for the per-side merge rule.
    pub fn apply_update(&self, symbol: &Symbol, bids: &[PriceLevel], asks: &[PriceLevel]) {
        let idx = self.shard_index(symbol);
        let mut shard = self.shards[idx].write();
        let book = shard.entry(symbol.clone()).or_insert_with(Book::new);
        merge_side(&mut book.bids, bids, true);
        merge_side(&mut book.asks, asks, false);
        book.last_update = Instant::now();
    }

    /// Returns a JSON document `{"bids":[["<price>","<qty>"], ...],"asks":[...]}`
    /// truncated to `depth` per side, or `"{}"` if the symbol is unseen.
    pub fn snapshot(&self, symbol: &Symbol, depth: usize) -> String {
        let idx = self.shard_index(symbol);
        let shard = self.shards[idx].read();
        let Some(book) = shard.get(symbol) else {
            return "{}".to_string();
        };

        let render = |levels: &[PriceLevel]| -> Vec<[String; 2]> {
            levels
                .iter()
                .take(depth)
                .map(|l| [l.price.to_string(), l.quantity.to_string()])
                .collect()
        };

        let doc = SnapshotDoc {
            bids: render(&book.bids),
            asks: render(&book.asks),
        };
        serde_json::to_string(&doc).unwrap_or_else(|_| "{}".to_string())
    }
}
