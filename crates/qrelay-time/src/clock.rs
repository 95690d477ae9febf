//! Simulated clock

use std::time::Duration;

use qrelay_core::SimTime;

/// Simulated clock
/// INVARIANT: never moves backwards
#[derive(Clone, Debug, Default)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Jump to `t`. Earlier targets leave the clock where it is.
    pub fn advance_to(&mut self, t: SimTime) -> SimTime {
        if t > self.now {
            self.now = t;
        }
        self.now
    }

    pub fn advance_by(&mut self, dt: Duration) -> SimTime {
        self.now = self.now + dt;
        self.now
    }
}
