//! Time: `std.time.*` and `env.now`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use covenant_abi::AbiValue;

use crate::error::{HostCallError, HostCallResult};
use crate::function::{FunctionKind, HostFunctionTable, host_functions};

/// A source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> HostCallResult<i64>;
    /// Block the calling guest for `millis` milliseconds.
    fn sleep(&self, millis: u64) -> HostCallResult<()>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> HostCallResult<i64> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| HostCallError::Unavailable(format!("system clock before epoch: {e}")))?;
        Ok(i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
    }

    fn sleep(&self, millis: u64) -> HostCallResult<()> {
        std::thread::sleep(Duration::from_millis(millis));
        Ok(())
    }
}

/// A clock that only moves when a guest sleeps.
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    /// Start at `millis` since the epoch.
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> HostCallResult<i64> {
        Ok(self.millis.load(Ordering::SeqCst))
    }

    fn sleep(&self, millis: u64) -> HostCallResult<()> {
        self.advance(i64::try_from(millis).unwrap_or(i64::MAX));
        Ok(())
    }
}

pub(crate) fn register(table: &mut HostFunctionTable, clock: Arc<dyn Clock>) {
    host_functions!(table, FunctionKind::Effect, "std.time", with clock, {
        "now" => () -> Int, move |_a| Ok(AbiValue::Int(clock.now_millis()?));
        "sleep" => (Int) -> Unit, move |a| {
            let millis = u64::try_from(a.int(0)?)
                .map_err(|_| HostCallError::InvalidInput("negative sleep duration".into()))?;
            clock.sleep(millis)?;
            Ok(AbiValue::Unit)
        };
    });

    host_functions!(table, FunctionKind::Effect, "env", with clock, {
        "now" => () -> Int, move |_a| Ok(AbiValue::Int(clock.now_millis()?));
    });
}
