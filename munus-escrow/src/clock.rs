//! Time sources
//!
//! The ledger and verifier take `now` as a parameter. A `Clock` is how the
//! node facade produces it.

use chrono::Utc;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Source of the current time in seconds since the epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}
