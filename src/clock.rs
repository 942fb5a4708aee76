//! Time source for lease bookkeeping.
//!
//! The dispatch queue never reads the wall clock directly; it asks a
//! [`LeaseClock`] for the current time and the lease timeout. Production code
//! uses [`SystemClock`], tests drive a [`ManualClock`] forward explicitly.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(60);

pub trait LeaseClock: Send + Sync {
    fn now(&self) -> SystemTime;

    /// How long a device may hold a lease before it is reclaimed.
    fn lease_timeout(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    lease_timeout: Duration,
}

impl SystemClock {
    pub fn new(lease_timeout: Duration) -> Self {
        Self { lease_timeout }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_TIMEOUT)
    }
}

impl LeaseClock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }
}

/// A clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<SystemTime>>,
    lease_timeout: Duration,
}

impl ManualClock {
    pub fn new(start: SystemTime, lease_timeout: Duration) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
            lease_timeout,
        }
    }

    /// Start at a fixed, round epoch second so that timestamps in assertions
    /// are predictable.
    pub fn at_epoch_secs(secs: u64, lease_timeout: Duration) -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(secs), lease_timeout)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl LeaseClock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }
}

/// Whole seconds since the UNIX epoch, saturating at zero for pre-epoch times.
pub fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Elapsed time between two instants; a clock that stepped backwards counts as
/// no time passed.
pub fn elapsed_between(earlier: SystemTime, later: SystemTime) -> Duration {
    later.duration_since(earlier).unwrap_or_default()
}
