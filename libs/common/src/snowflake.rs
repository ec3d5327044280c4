use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Campus epoch: 2025-04-01T00:00:00Z in milliseconds since Unix epoch.
const CAMPUS_EPOCH_MS: u64 = 1_743_465_600_000;

const WORKER_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct State {
    last_ms: u64,
    sequence: u64,
}

/// 64-bit time-ordered id generator for persisted chat messages.
///
/// Layout (MSB → LSB):
/// - Bits 63–22: Timestamp (42 bits), ms since the campus epoch
/// - Bits 21–12: Worker ID (10 bits)
/// - Bits 11–0:  Sequence (12 bits), per-ms counter
///
/// If the wall clock steps backwards the generator keeps issuing ids on the
/// last observed millisecond, so ids stay strictly increasing.
pub struct SnowflakeGenerator {
    worker_id: u64,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    /// Create a generator. `worker_id` is masked to 10 bits.
    pub fn new(worker_id: u16) -> Self {
        Self {
            worker_id: u64::from(worker_id) & ((1 << WORKER_BITS) - 1),
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut now_ms = current_ms().max(state.last_ms);

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted: borrow the next millisecond.
                now_ms = state.last_ms + 1;
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now_ms;

        let ts = now_ms.saturating_sub(CAMPUS_EPOCH_MS);
        let id = (ts << (WORKER_BITS + SEQUENCE_BITS))
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence;

        id as i64
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(CAMPUS_EPOCH_MS)
}

/// Extract the creation timestamp (ms since Unix epoch) from a snowflake id.
pub fn snowflake_timestamp_ms(id: i64) -> u64 {
    let ts = (id as u64) >> (WORKER_BITS + SEQUENCE_BITS);
    ts + CAMPUS_EPOCH_MS
}
