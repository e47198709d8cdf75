//! Monotonic time for command deadlines and debouncing.

/// A monotonic millisecond clock. The origin is arbitrary but the value must
/// never go backwards.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// A point in time after which a wait gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: u64,
    timeout_ms: u64,
}

impl Deadline {
    pub fn start<T: Clock>(clock: &T, timeout_ms: u64) -> Self {
        Self {
            start: clock.now_ms(),
            timeout_ms,
        }
    }

    pub fn expired<T: Clock>(&self, clock: &T) -> bool {
        self.elapsed(clock.now_ms()) >= self.timeout_ms
    }

    fn elapsed(&self, now: u64) -> u64 {
        now.saturating_sub(self.start)
    }
}
