//! Snowflake id generation.
//!
//! Layout of a generated id (most significant bit first):
//!
//! ```text
//! 0 | 41 bits milliseconds since EPOCH_MS | 10 bits node | 12 bits sequence
//! ```
//!
//! Ids from one node are strictly increasing. Ids from different nodes never
//! collide as long as every node is configured with a distinct node id.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Custom epoch (2010-11-04T01:42:54.657Z).
pub const EPOCH_MS: u64 = 1_288_834_974_657;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE: u16 = (1 << NODE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("node id {0} out of range (max 1023)")]
    NodeOutOfRange(u16),
}

#[derive(Debug, Default)]
struct State {
    last_ms: u64,
    sequence: u64,
}

/// Thread-safe snowflake id generator for a single node.
#[derive(Debug)]
pub struct Snowflake {
    node: u16,
    state: Mutex<State>,
}

impl Snowflake {
    /// Creates a generator for `node` (0..=1023).
    pub fn new(node: u16) -> Result<Self, IdError> {
        if node > MAX_NODE {
            return Err(IdError::NodeOutOfRange(node));
        }
        Ok(Self {
            node,
            state: Mutex::new(State::default()),
        })
    }

    /// Returns the node id this generator stamps into every id.
    pub fn node(&self) -> u16 {
        self.node
    }

    /// Generates the next id.
    pub fn generate(&self) -> u64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        // a clock that stepped backwards keeps using the last timestamp
        let mut now = now_ms().max(state.last_ms);

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = now_ms().max(state.last_ms);
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        ((now - EPOCH_MS) << (NODE_BITS + SEQUENCE_BITS))
            | (u64::from(self.node) << SEQUENCE_BITS)
            | state.sequence
    }

    /// Extracts the node id from a generated id.
    pub fn node_of(id: u64) -> u16 {
        ((id >> SEQUENCE_BITS) & u64::from(MAX_NODE)) as u16
    }

    /// Extracts the Unix timestamp in milliseconds from a generated id.
    pub fn timestamp_of(id: u64) -> u64 {
        (id >> (NODE_BITS + SEQUENCE_BITS)) + EPOCH_MS
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rejects_out_of_range_node() {
        assert_eq!(Snowflake::new(1024).unwrap_err(), IdError::NodeOutOfRange(1024));
        assert!(Snowflake::new(1023).is_ok());
    }

    #[test]
    fn ids_are_strictly_increasing() {
        let generator = Snowflake::new(1).unwrap();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = generator.generate();
            assert!(id > last);
            last = id;
        }
    }

    #[test]
    fn node_and_timestamp_are_recoverable() {
        let generator = Snowflake::new(37).unwrap();
        let id = generator.generate();
        assert_eq!(Snowflake::node_of(id), 37);

        let ts = Snowflake::timestamp_of(id);
        assert!(ts.abs_diff(now_ms()) < 5_000);
    }

    #[test]
    fn unique_across_threads() {
        let generator = Arc::new(Snowflake::new(3).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..2_000).map(|_| generator.generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 8_000);
    }
}
