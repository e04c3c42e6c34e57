//! Task and workflow code generation.
//!
//! Codes are 64-bit snowflake ids: milliseconds since 2021-01-01 UTC in the
//! high bits, then a 2-bit machine id, then a 13-bit per-millisecond
//! sequence. Codes from one generator are strictly increasing.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::EngineError;

/// 2021-01-01T00:00:00Z in epoch milliseconds.
const EPOCH_MS: i64 = 1_609_459_200_000;
const SEQUENCE_BITS: u32 = 13;
const MACHINE_BITS: u32 = 2;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const MAX_MACHINE_ID: i64 = (1 << MACHINE_BITS) - 1;

/// Source of unique, non-zero codes.
pub trait CodeGenerator: Send + Sync {
    fn next_code(&self) -> Result<i64, EngineError>;

    /// `count` fresh codes.
    fn next_codes(&self, count: usize) -> Result<Vec<i64>, EngineError> {
        (0..count).map(|_| self.next_code()).collect()
    }
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
}

#[derive(Debug)]
pub struct SnowflakeCodeGenerator {
    machine_id: i64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeCodeGenerator {
    /// Only the low two bits of `machine_id` are used.
    pub fn new(machine_id: u8) -> Self {
        Self {
            machine_id: i64::from(machine_id) & MAX_MACHINE_ID,
            state: Mutex::new(SnowflakeState::default()),
        }
    }

    /// Derive the machine id from a host name.
    pub fn for_host(host: &str) -> Self {
        let hash = host.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        Self::new((hash & 0xff) as u8)
    }
}

impl CodeGenerator for SnowflakeCodeGenerator {
    fn next_code(&self) -> Result<i64, EngineError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::CodeGeneration("generator state poisoned".into()))?;

        let mut now = Utc::now().timestamp_millis();
        if now < state.last_ms {
            return Err(EngineError::CodeGeneration(format!(
                "clock moved backwards by {} ms",
                state.last_ms - now
            )));
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond.
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = Utc::now().timestamp_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        Ok(((now - EPOCH_MS) << (SEQUENCE_BITS + MACHINE_BITS))
            | (self.machine_id << SEQUENCE_BITS)
            | state.sequence)
    }
}

/// Deterministic generator handing out `start, start + 1, ...`.
#[derive(Debug)]
pub struct SequenceCodeGenerator {
    next: AtomicI64,
}

impl SequenceCodeGenerator {
    pub fn starting_at(start: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
        }
    }
}

impl CodeGenerator for SequenceCodeGenerator {
    fn next_code(&self) -> Result<i64, EngineError> {
        let code = self.next.fetch_add(1, Ordering::Relaxed);
        if code <= 0 {
            return Err(EngineError::CodeGeneration(format!("non-positive code {code}")));
        }
        Ok(code)
    }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflake_codes_are_unique_and_increasing() {
        let generator = SnowflakeCodeGenerator::new(1);
        let codes = generator.next_codes(20_000).unwrap();
        assert!(codes.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(codes.iter().all(|code| *code > 0));
    }

    #[test]
    fn machine_id_is_encoded() {
        let generator = SnowflakeCodeGenerator::new(3);
        let code = generator.next_code().unwrap();
        assert_eq!((code >> SEQUENCE_BITS) & MAX_MACHINE_ID, 3);
    }

    #[test]
    fn machine_id_is_masked_to_two_bits() {
        let generator = SnowflakeCodeGenerator::new(0b110);
        let code = generator.next_code().unwrap();
        assert_eq!((code >> SEQUENCE_BITS) & MAX_MACHINE_ID, 0b10);
    }

    #[test]
    fn sequence_generator_counts_up() {
        let generator = SequenceCodeGenerator::starting_at(7);
        assert_eq!(generator.next_codes(3).unwrap(), vec![7, 8, 9]);
    }

    #[test]
    fn sequence_generator_refuses_zero() {
        let generator = SequenceCodeGenerator::starting_at(0);
        assert!(matches!(generator.next_code(), Err(EngineError::CodeGeneration(_))));
    }
}
