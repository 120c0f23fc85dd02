use std::cmp::Ordering;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

const TIMESTAMP_BITS: u32 = 42;
const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const MACHINE_MASK: u64 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_TIMESTAMP: u64 = (1 << TIMESTAMP_BITS) - 1;

/// 64-bit audit record identifier: top 42 bits are UTC milliseconds since the
/// epoch, then 10 bits of machine id, then 12 bits of per-millisecond
/// sequence (invariant 9: ids are monotonically increasing in wall-clock
/// milliseconds within one machine id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnowflakeId(pub u64);

impl SnowflakeId {
    pub fn from_parts(timestamp_ms: u64, machine_id: u16, sequence: u16) -> Self {
        let ts = timestamp_ms.min(MAX_TIMESTAMP);
        let value = (ts << (MACHINE_BITS + SEQUENCE_BITS))
            | ((machine_id as u64 & MACHINE_MASK) << SEQUENCE_BITS)
            | (sequence as u64 & SEQUENCE_MASK);
        SnowflakeId(value)
    }

    pub fn timestamp_millis(&self) -> u64 {
        self.0 >> (MACHINE_BITS + SEQUENCE_BITS)
    }

    pub fn machine_id(&self) -> u16 {
        ((self.0 >> SEQUENCE_BITS) & MACHINE_MASK) as u16
    }

    pub fn sequence(&self) -> u16 {
        (self.0 & SEQUENCE_MASK) as u16
    }

    /// Agrees with the sign of `ms(id) - ms(t)` (Testable Property 9).
    pub fn compare_time(&self, timestamp_ms: u64) -> Ordering {
        self.timestamp_millis().cmp(&timestamp_ms)
    }

    pub fn as_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl std::fmt::Display for SnowflakeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

struct GeneratorState {
    last_ms: u64,
    sequence: u16,
}

/// Per-process id generator. A collision (two calls producing the same id)
/// means the sequence counter wrapped within one millisecond or the clock
/// went backwards — both indicate a bug, and the caller aborts rather than
/// silently reusing an id (§4.6 append policy).
pub struct SnowflakeGenerator {
    machine_id: u16,
    state: Mutex<GeneratorState>,
}

impl SnowflakeGenerator {
    pub fn new(machine_id: u16) -> Self {
        SnowflakeGenerator {
            machine_id,
            state: Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> SnowflakeId {
        let now_ms = now_millis();
        let mut state = self.state.lock().expect("snowflake generator lock poisoned");

        let ms = if now_ms < state.last_ms {
            // Clock moved backwards; keep using the last observed millisecond
            // rather than emitting a non-monotonic id.
            state.last_ms
        } else {
            now_ms
        };

        if ms == state.last_ms {
            state.sequence = state.sequence.wrapping_add(1) & (SEQUENCE_MASK as u16);
            if state.sequence == 0 {
                // Sequence space exhausted for this millisecond: spin to the
                // next one rather than collide.
                let next_ms = ms + 1;
                state.last_ms = next_ms;
                return SnowflakeId::from_parts(next_ms, self.machine_id, state.sequence);
            }
        } else {
            state.sequence = 0;
            state.last_ms = ms;
        }

        SnowflakeId::from_parts(state.last_ms, self.machine_id, state.sequence)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}
