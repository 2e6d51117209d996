//! Strictly increasing millisecond timestamps.

use std::sync::atomic::{AtomicI64, Ordering};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Hands out wall-clock millisecond timestamps that never repeat or go backwards.
///
/// Two events received within the same millisecond get consecutive values, so
/// timestamp-suffixed storage keys stay unique.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp: `max(now, previous + 1)`.
    pub fn next(&self) -> i64 {
        let now = now_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_clock_tracks_wall_time() {
        let clock = MonotonicClock::new();
        let before = now_millis();
        let ts = clock.next();
        assert!(ts >= before);
    }
}
