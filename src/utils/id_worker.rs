//! Snowflake style id source.
//!
//! Layout, high to low: 41 bits of milliseconds since [`EPOCH_MS`], 10 bits of
//! worker id, 12 bits of per-millisecond sequence.

use parking_lot::Mutex;
use rand::Rng;

use crate::utils::time::now_millis;

/// 2020-01-01T00:00:00Z
const EPOCH_MS: u64 = 1_577_836_800_000;
const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Process-scoped unique id generator.
///
/// Built once by [`ClientBuilder`](crate::ClientBuilder) and handed to whoever
/// needs fresh ids; there is no global instance.
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: u64,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    last_ms: u64,
    sequence: u64,
}

impl IdGenerator {
    pub fn new(worker_id: u64) -> Self {
        Self {
            worker_id: worker_id & MAX_WORKER_ID,
            state: Mutex::new(State::default()),
        }
    }

    /// Generator with a random worker id
    pub fn random() -> Self {
        Self::new(rand::thread_rng().gen_range(0..=MAX_WORKER_ID))
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.state.lock();
        // A clock step backwards keeps issuing from the last seen millisecond.
        let mut now = now_millis().max(state.last_ms);

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted inside this millisecond; borrow the next one.
                now += 1;
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let elapsed = now.saturating_sub(EPOCH_MS);
        ((elapsed << (WORKER_BITS + SEQUENCE_BITS)) | (self.worker_id << SEQUENCE_BITS) | state.sequence) as i64
    }
}
