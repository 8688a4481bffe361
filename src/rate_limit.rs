use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

// Expired windows are only swept once the map grows past this.
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Fixed-window request counter per client key.
///
/// State lives in this process only, so several instances behind a load
/// balancer each enforce their own budget.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now())
    }

    /// Count one request for `key` at `now`. The window restarts once `now`
    /// reaches its reset instant.
    pub fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() > PRUNE_THRESHOLD {
            entries.retain(|_, e| e.reset_at > now);
        }

        if let Some(entry) = entries.get_mut(key) {
            if now < entry.reset_at {
                if entry.count >= self.capacity {
                    return RateDecision::Limited {
                        retry_after: entry.reset_at - now,
                    };
                }
                entry.count += 1;
                return RateDecision::Allowed {
                    remaining: self.capacity - entry.count,
                };
            }
        }

        entries.insert(
            key.to_string(),
            WindowEntry {
                count: 1,
                reset_at: now + self.window,
            },
        );
        RateDecision::Allowed {
            remaining: self.capacity - 1,
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Whole seconds to advertise in `retryAfter`, never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::{RateDecision, RateLimiter, retry_after_secs};

    #[test]
    fn eleventh_request_in_window_is_rejected() {
        let limiter = RateLimiter::default();
        let start = Instant::now();
        for i in 0..10 {
            let d = limiter.check_at("1.2.3.4", start + Duration::from_secs(i));
            assert!(d.is_allowed(), "request {i}");
        }
        let d = limiter.check_at("1.2.3.4", start + Duration::from_secs(30));
        assert_eq!(
            d,
            RateDecision::Limited {
                retry_after: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn window_resets_exactly_at_reset_instant() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        assert!(limiter.check_at("k", start).is_allowed());
        assert!(limiter.check_at("k", start).is_allowed());
        let just_before = start + Duration::from_secs(60) - Duration::from_millis(1);
        assert!(!limiter.check_at("k", just_before).is_allowed());
        let at_reset = start + Duration::from_secs(60);
        assert_eq!(
            limiter.check_at("k", at_reset),
            RateDecision::Allowed { remaining: 1 }
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check_at("a", now).is_allowed());
        assert!(!limiter.check_at("a", now).is_allowed());
        assert!(limiter.check_at("b", now).is_allowed());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(59_100)), 60);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
