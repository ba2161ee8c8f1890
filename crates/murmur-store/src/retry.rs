//! Capped exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule for reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Delay scaled by a random factor in `[0.5, 1.5)`, never above the cap.
    pub fn jittered(&self, attempt: u32) -> Duration {
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        Duration::try_from_secs_f64(self.delay(attempt).as_secs_f64() * factor)
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_cap() {
        let b = Backoff::default();
        assert_eq!(b.delay(0), Duration::from_millis(50));
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(3), Duration::from_millis(400));
        assert_eq!(b.delay(10), Duration::from_secs(2));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let b = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));
        for attempt in 0..6 {
            let d = b.jittered(attempt);
            assert!(d + Duration::from_micros(1) >= b.delay(attempt) / 2);
            assert!(d <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_huge_delays_saturate_at_cap() {
        let b = Backoff::new(Duration::MAX, Duration::MAX);
        assert_eq!(b.delay(5), Duration::MAX);
        assert!(b.jittered(5) <= Duration::MAX);

        let b = Backoff::new(Duration::from_secs(u64::MAX / 2), Duration::MAX);
        assert!(b.jittered(1) >= Duration::from_secs(u64::MAX / 4));
    }
}
