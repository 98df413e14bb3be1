use std::collections::HashMap;

const SECONDS_PER_HOUR: u64 = 3600;

/// Per-field emission throttle.
///
/// Each `(destination, tag)` pair keeps its own last-emitted time, so a field
/// published every minute never delays one published every hour. The ledger
/// lives for the process lifetime and starts empty, which means every field is
/// admitted the first time it is seen.
#[derive(Debug, Default)]
pub struct RateLimiter {
    ledger: HashMap<(String, String), u64>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest gap between two emissions of a field, in seconds.
    /// `None` for fields that are never emitted.
    pub fn min_interval(max_emits_per_hour: u32) -> Option<u64> {
        if max_emits_per_hour == 0 {
            return None;
        }
        Some((SECONDS_PER_HOUR / u64::from(max_emits_per_hour)).max(1))
    }

    /// Decides whether the field may be emitted at `now` (epoch seconds) and,
    /// if so, records the emission.
    pub fn admit(
        &mut self,
        destination: &str,
        tag: &str,
        max_emits_per_hour: u32,
        now: u64,
    ) -> bool {
        let Some(interval) = Self::min_interval(max_emits_per_hour) else {
            return false;
        };

        let key = (destination.to_string(), tag.to_string());
        let admitted = match self.ledger.get(&key) {
            Some(last) => now.saturating_sub(*last) > interval,
            None => true,
        };
        if admitted {
            self.ledger.insert(key, now);
        }
        admitted
    }

    pub fn last_emitted(&self, destination: &str, tag: &str) -> Option<u64> {
        self.ledger
            .get(&(destination.to_string(), tag.to_string()))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixty_per_hour() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.admit("elec", "V_L1", 60, 0));
        assert!(!limiter.admit("elec", "V_L1", 60, 30));
        assert!(!limiter.admit("elec", "V_L1", 60, 60));
        assert!(limiter.admit("elec", "V_L1", 60, 61));
        assert_eq!(limiter.last_emitted("elec", "V_L1"), Some(61));
    }

    #[test]
    fn test_rejected_emission_does_not_touch_ledger() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.admit("elec", "V_L1", 60, 1000));
        assert!(!limiter.admit("elec", "V_L1", 60, 1030));
        assert_eq!(limiter.last_emitted("elec", "V_L1"), Some(1000));
    }

    #[test]
    fn test_zero_rate_never_admits() {
        let mut limiter = RateLimiter::new();
        for now in [0, 1, 3600, 86_400, u64::MAX] {
            assert!(!limiter.admit("elec", "I_L1", 0, now));
        }
        assert_eq!(limiter.last_emitted("elec", "I_L1"), None);
    }

    #[test]
    fn test_rates_above_one_per_second_are_clamped() {
        assert_eq!(RateLimiter::min_interval(3600), Some(1));
        assert_eq!(RateLimiter::min_interval(100_000), Some(1));
        assert_eq!(RateLimiter::min_interval(12), Some(300));
        assert_eq!(RateLimiter::min_interval(7), Some(514));

        let mut limiter = RateLimiter::new();
        assert!(limiter.admit("elec", "P", 100_000, 10));
        assert!(!limiter.admit("elec", "P", 100_000, 10));
        assert!(!limiter.admit("elec", "P", 100_000, 11));
        assert!(limiter.admit("elec", "P", 100_000, 12));
    }

    #[test]
    fn test_fields_are_throttled_independently() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.admit("elec", "V_L1", 60, 100));
        assert!(limiter.admit("elec", "power_failures", 12, 100));
        assert!(limiter.admit("gas", "V_L1", 60, 100));

        assert!(limiter.admit("elec", "V_L1", 60, 161));
        assert!(!limiter.admit("elec", "power_failures", 12, 161));
        assert!(limiter.admit("elec", "power_failures", 12, 401));
    }

    #[test]
    fn test_clock_going_backwards_does_not_admit() {
        let mut limiter = RateLimiter::new();
        assert!(limiter.admit("elec", "V_L1", 60, 1000));
        assert!(!limiter.admit("elec", "V_L1", 60, 500));
    }
}
