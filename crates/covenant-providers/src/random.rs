//! Randomness: `std.random.*`.

use std::sync::Arc;

use covenant_abi::AbiValue;
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};

use crate::crypto::to_hex;
use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// Upper bound on `std.random.bytes` requests.
pub const MAX_RANDOM_BYTES: usize = 1 << 20;

/// A source of random values.
pub trait RandomSource: Send + Sync {
    /// A uniform integer in `[min, max]`.
    fn int(&self, min: i64, max: i64) -> HostCallResult<i64>;
    /// A uniform float in `[0, 1)`.
    fn float(&self) -> HostCallResult<f64>;
    /// `len` random bytes.
    fn bytes(&self, len: usize) -> HostCallResult<Vec<u8>>;
}

fn check_range(min: i64, max: i64) -> HostCallResult<()> {
    if min > max {
        Err(HostCallError::InvalidInput(format!(
            "empty range: {min} > {max}"
        )))
    } else {
        Ok(())
    }
}

/// Randomness from the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn int(&self, min: i64, max: i64) -> HostCallResult<i64> {
        check_range(min, max)?;
        Ok(OsRng.gen_range(min..=max))
    }

    fn float(&self) -> HostCallResult<f64> {
        Ok(OsRng.gen_range(0.0..1.0))
    }

    fn bytes(&self, len: usize) -> HostCallResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| HostCallError::Unavailable(format!("OS randomness: {e}")))?;
        Ok(buf)
    }
}

/// A deterministic generator, for reproducible runs.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Create a generator from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn int(&self, min: i64, max: i64) -> HostCallResult<i64> {
        check_range(min, max)?;
        Ok(self.rng.lock().gen_range(min..=max))
    }

    fn float(&self) -> HostCallResult<f64> {
        Ok(self.rng.lock().gen_range(0.0..1.0))
    }

    fn bytes(&self, len: usize) -> HostCallResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.rng.lock().fill_bytes(&mut buf);
        Ok(buf)
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, random: Arc<dyn RandomSource>) {
    host_functions!(table, FunctionKind::Effect, "std.random", with random, {
        "int" => (Int, Int) -> Int, move |a| Ok(AbiValue::Int(random.int(a.int(0)?, a.int(1)?)?));
        "float" => () -> Float, move |_a| Ok(AbiValue::Float(random.float()?));
        "bytes" => (Int) -> Str, move |a| {
            let len = usize::try_from(a.int(0)?)
                .ok()
                .filter(|n| *n <= MAX_RANDOM_BYTES)
                .ok_or_else(|| HostCallError::InvalidInput("byte count out of range".into()))?;
            Ok(AbiValue::Str(to_hex(&random.bytes(len)?)))
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_reproducible() {
        let a = SeededRandom::new(42);
        let b = SeededRandom::new(42);

        assert_eq!(a.int(0, 1_000_000).unwrap(), b.int(0, 1_000_000).unwrap());
        assert_eq!(a.bytes(16).unwrap(), b.bytes(16).unwrap());
    }

    #[test]
    fn test_int_range_is_inclusive() {
        let rng = SeededRandom::new(7);
        for _ in 0..100 {
            let v = rng.int(3, 4).unwrap();
            assert!((3..=4).contains(&v));
        }
        assert_eq!(rng.int(5, 5).unwrap(), 5);
        assert!(rng.int(2, 1).is_err());
    }

    #[test]
    fn test_float_in_unit_interval() {
        let f = OsRandom.float().unwrap();
        assert!((0.0..1.0).contains(&f));
        assert_eq!(OsRandom.bytes(8).unwrap().len(), 8);
    }
}
