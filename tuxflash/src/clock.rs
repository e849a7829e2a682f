//! Time source used for settle delays and acknowledgement deadlines.

use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock with a blocking sleep.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread.
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}
