//! Content-addressed message deduplication.
//!
//! A Bloom filter pre-check guards a bounded LRU of exact 64-bit content
//! fingerprints (XXH64, via `twox-hash` — the crate counterpart of the
//! source's `xxhash.h`). The Bloom filter is never cleared during the
//! process lifetime in the source, which lets its false-positive rate grow
//! unbounded over a long run; this rewrite resolves that open question with
//! a double-bloom rotation (see `RotatingBloom`) instead of carrying the
//! defect forward.

use std::collections::HashMap;
use std::hash::Hasher;

use parking_lot::Mutex;
use twox_hash::XxHash64;

/// A fixed-size Bloom filter with `k` independent hash functions, derived
/// by re-seeding XXH64 per hash index (the source does the same: it hashes
/// `item + seed` through `std::hash`).
struct BloomFilter {
    bits: Vec<bool>,
    num_hashes: usize,
}

impl BloomFilter {
    fn new(size_bits: usize, num_hashes: usize) -> Self {
        Self {
            bits: vec![false; size_bits.max(1)],
            num_hashes,
        }
    }

    fn indices(&self, fingerprint: u64) -> impl Iterator<Item = usize> + '_ {
        let len = self.bits.len() as u64;
        (0..self.num_hashes).map(move |seed| {
            let mut hasher = XxHash64::with_seed(seed as u64);
            hasher.write_u64(fingerprint);
            (hasher.finish() % len) as usize
        })
    }

    fn insert(&mut self, fingerprint: u64) {
        for idx in self.indices(fingerprint).collect::<Vec<_>>() {
            self.bits[idx] = true;
        }
    }

    fn probably_contains(&self, fingerprint: u64) -> bool {
        self.indices(fingerprint).all(|idx| self.bits[idx])
    }

    fn clear(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = false);
    }
}

/// Two Bloom filters swapped on a rotation interval: reads check both
/// (logical OR), writes only ever touch the active one. At rotation the
/// shadow (which has been silently warming up) becomes active and the
/// retiring filter is cleared and becomes the new shadow — false-positive
/// rate never grows past what `bloom_rotate_interval` inserts produce.
struct RotatingBloom {
    active: BloomFilter,
    shadow: BloomFilter,
    inserts_since_rotation: u64,
    rotate_interval: u64,
}

impl RotatingBloom {
    fn new(size_bits: usize, num_hashes: usize, rotate_interval: u64) -> Self {
        Self {
            active: BloomFilter::new(size_bits, num_hashes),
            shadow: BloomFilter::new(size_bits, num_hashes),
            inserts_since_rotation: 0,
            rotate_interval: rotate_interval.max(1),
        }
    }

    fn probably_contains(&self, fingerprint: u64) -> bool {
        self.active.probably_contains(fingerprint) || self.shadow.probably_contains(fingerprint)
    }

    fn insert(&mut self, fingerprint: u64) {
        self.active.insert(fingerprint);
        self.shadow.insert(fingerprint);
        self.inserts_since_rotation += 1;
        if self.inserts_since_rotation >= self.rotate_interval {
            std::mem::swap(&mut self.active, &mut self.shadow);
            self.shadow.clear();
            self.inserts_since_rotation = 0;
        }
    }
}

struct LruCache {
    capacity: usize,
    order: std::collections::VecDeque<u64>,
    members: HashMap<u64, ()>,
}

impl LruCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: std::collections::VecDeque::with_capacity(capacity),
            members: HashMap::with_capacity(capacity),
        }
    }

    fn contains(&self, fingerprint: u64) -> bool {
        self.members.contains_key(&fingerprint)
    }

    fn insert_most_recent(&mut self, fingerprint: u64) {
        if self.members.insert(fingerprint, ()).is_some() {
            // Already tracked; leave its position — exact recency reordering
            // is not required by the spec, only eviction-by-capacity.
            return;
        }
        self.order.push_front(fingerprint);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_back() {
                self.members.remove(&oldest);
            }
        }
    }
}

struct Inner {
    bloom: RotatingBloom,
    lru: LruCache,
}

/// Thread-safe deduplicator. Callers invoke `is_duplicate` from the
/// pipeline's single consumer thread; the internal mutex protects a brief
/// critical section.
pub struct Deduplicator {
    inner: Mutex<Inner>,
}

impl Deduplicator {
    pub fn new(bloom_bits: usize, bloom_hashes: usize, lru_capacity: usize) -> Self {
        Self::with_rotation(bloom_bits, bloom_hashes, lru_capacity, 1_000_000)
    }

    pub fn with_rotation(
        bloom_bits: usize,
        bloom_hashes: usize,
        lru_capacity: usize,
        bloom_rotate_interval: u64,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                bloom: RotatingBloom::new(bloom_bits, bloom_hashes, bloom_rotate_interval),
                lru: LruCache::new(lru_capacity),
            }),
        }
    }

    /// Returns `false` on the first sighting of `bytes`, `true` on every
    /// subsequent call while the fingerprint survives in the LRU window.
    pub fn is_duplicate(&self, bytes: &[u8]) -> bool {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(bytes);
        let fingerprint = hasher.finish();
        let mut inner = self.inner.lock();

        if inner.bloom.probably_contains(fingerprint) && inner.lru.contains(fingerprint) {
            return true;
        }

        inner.bloom.insert(fingerprint);
        inner.lru.insert_most_recent(fingerprint);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_not_duplicate_subsequent_are() {
        let dedup = Deduplicator::new(100_000, 5, 1_000);
        let payload = b"{\"bids\":[],\"asks\":[]}";
        assert!(!dedup.is_duplicate(payload));
        assert!(dedup.is_duplicate(payload));
        assert!(dedup.is_duplicate(payload));
    }

    #[test]
    fn distinct_payloads_are_independent() {
        let dedup = Deduplicator::new(100_000, 5, 1_000);
        assert!(!dedup.is_duplicate(b"a"));
        assert!(!dedup.is_duplicate(b"b"));
        assert!(dedup.is_duplicate(b"a"));
        assert!(dedup.is_duplicate(b"b"));
    }

    #[test]
    fn lru_eviction_allows_refingerprint_after_capacity_exceeded() {
        let dedup = Deduplicator::new(100_000, 5, 2);
        assert!(!dedup.is_duplicate(b"1"));
        assert!(!dedup.is_duplicate(b"2"));
        assert!(!dedup.is_duplicate(b"3")); // evicts "1" from the LRU
        // "1" no longer tracked by the LRU even though the (never-cleared
        // within this test) Bloom filter may still say "possibly present" —
        // is_duplicate requires both signals, so it is accepted again.
        assert!(!dedup.is_duplicate(b"1"));
    }

    #[test]
    fn rotation_bounds_false_positive_growth_without_forgetting_recent_inserts() {
        let dedup = Deduplicator::with_rotation(2_000, 5, 10_000, 50);
        for i in 0..200u64 {
            let bytes = i.to_le_bytes();
            assert!(!dedup.is_duplicate(&bytes));
        }
        // Every one of the last `rotate_interval` inserts must still read
        // back as a duplicate: rotation must never evict something the LRU
        // still tracks.
        for i in 150..200u64 {
            let bytes = i.to_le_bytes();
            assert!(dedup.is_duplicate(&bytes));
        }
    }
}
