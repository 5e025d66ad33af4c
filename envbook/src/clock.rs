//! Source of "now" for validation and scanning.
//!
//! Production code uses [`SystemClock`]; tests drive time explicitly with [`ManualClock`].

use std::sync::{Arc, Mutex};

use chrono::{Duration, Local};

use crate::types::{Timestamp, minute_floor};

pub trait Clock: Send + Sync {
    /// Current wall-clock time in the process timezone.
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Starts at the current minute of the system clock.
    pub fn starting_now() -> Self {
        Self::new(minute_floor(SystemClock.now()))
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
