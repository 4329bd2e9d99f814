//! Cluster-unique numeric ids for transactions and branches
//!
//! Layout of a generated id (most significant bit first):
//! - 41 bits: milliseconds since [`EPOCH_MS`]
//! - 10 bits: node id
//! - 12 bits: per-millisecond sequence
//!
//! Two coordinators with distinct node ids never hand out the same id. Within
//! one node ids are strictly increasing.

use crate::timestamp::now_millis;
use std::sync::atomic::{AtomicU64, Ordering};

/// Custom epoch (2020-01-01T00:00:00Z) to stretch the 41-bit timestamp
pub const EPOCH_MS: u64 = 1_577_836_800_000;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake-style id generator
#[derive(Debug)]
pub struct IdGenerator {
    node_id: u16,
    /// Last issued (timestamp << SEQUENCE_BITS | sequence), node bits excluded
    last: AtomicU64,
}

impl IdGenerator {
    /// Create a generator for `node_id`; only the low 10 bits are used
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: node_id & MAX_NODE_ID,
            last: AtomicU64::new(0),
        }
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    /// Next id, strictly greater than every id this generator issued before
    pub fn next_id(&self) -> u64 {
        let now = now_millis().saturating_sub(EPOCH_MS) << SEQUENCE_BITS;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            // If the clock has not moved past the last issued slot (or went
            // backwards) keep counting from the last slot instead.
            let next = if now > current { now } else { current + 1 };
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return self.compose(next),
                Err(observed) => current = observed,
            }
        }
    }

    fn compose(&self, slot: u64) -> u64 {
        let timestamp = slot >> SEQUENCE_BITS;
        let sequence = slot & SEQUENCE_MASK;
        (timestamp << (NODE_BITS + SEQUENCE_BITS))
            | ((self.node_id as u64) << SEQUENCE_BITS)
            | sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_ids_increase() {
        let generator = IdGenerator::new(3);
        let mut previous = 0;
        for _ in 0..10_000 {
            let id = generator.next_id();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_node_id_embedded() {
        let generator = IdGenerator::new(5);
        let id = generator.next_id();
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE_ID as u64, 5);
    }

    #[test]
    fn test_concurrent_uniqueness() {
        let generator = Arc::new(IdGenerator::new(1));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..2_000).map(|_| generator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
    }
}
