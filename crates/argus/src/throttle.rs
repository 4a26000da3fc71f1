//
// throttle.rs
//
// Copyright (C) 2024 Posit Software, PBC. All rights reserved.
//
//

use std::time::Duration;
use std::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);

/// Per-logpoint emission throttle: a token bucket over a one-second window.
/// Exceeding the budget disables the breakpoint for `delay`, after which the
/// next hit re-enables it with a fresh window.
///
/// Buckets are intentionally per breakpoint, never shared, so one noisy
/// logpoint cannot starve another.
#[derive(Debug)]
pub struct LogRateLimiter {
    max_per_window: u32,
    delay: Duration,
    window_start: Instant,
    count: u32,
    disabled_until: Option<Instant>,
}

impl LogRateLimiter {
    pub fn new(max_logs_per_second: u32, log_delay_seconds: u64) -> Self {
        Self {
            // A zero budget would disable the logpoint permanently
            max_per_window: max_logs_per_second.max(1),
            delay: Duration::from_secs(log_delay_seconds),
            window_start: Instant::now(),
            count: 0,
            disabled_until: None,
        }
    }

    /// Whether an emission at `now` is within budget.
    pub fn allow(&mut self, now: Instant) -> bool {
        if let Some(until) = self.disabled_until {
            if now < until {
                return false;
            }
            self.disabled_until = None;
            self.window_start = now;
            self.count = 0;
        }

        if now.duration_since(self.window_start) >= WINDOW {
            self.window_start = now;
            self.count = 0;
        }

        if self.count >= self.max_per_window {
            self.disabled_until = Some(now + self.delay);
            return false;
        }

        self.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_emission_allowed() {
        let mut limiter = LogRateLimiter::new(1, 1);
        assert!(limiter.allow(Instant::now()));
    }

    #[test]
    fn test_exceeding_budget_disables_for_delay() {
        let mut limiter = LogRateLimiter::new(1, 1);
        let start = Instant::now();

        assert!(limiter.allow(start));
        // Second hit inside the window trips the limiter
        assert!(!limiter.allow(start + Duration::from_millis(100)));
        // Still disabled through the delay window
        assert!(!limiter.allow(start + Duration::from_millis(900)));
        // Re-enabled one delay after the trip, with a fresh budget
        assert!(limiter.allow(start + Duration::from_millis(1150)));
        // And trips again
        assert!(!limiter.allow(start + Duration::from_millis(1200)));
    }

    #[test]
    fn test_quiet_breakpoint_never_trips() {
        let mut limiter = LogRateLimiter::new(1, 1);
        let start = Instant::now();

        for i in 0..5 {
            assert!(limiter.allow(start + Duration::from_secs(2 * i)));
        }
    }

    #[test]
    fn test_budget_resets_each_window() {
        let mut limiter = LogRateLimiter::new(2, 1);
        let start = Instant::now();

        assert!(limiter.allow(start));
        assert!(limiter.allow(start + Duration::from_millis(10)));
        assert!(!limiter.allow(start + Duration::from_millis(20)));

        // Disabled until 1.02s; a later window gets a fresh budget
        assert!(limiter.allow(start + Duration::from_millis(1100)));
        assert!(limiter.allow(start + Duration::from_millis(1110)));
    }
}
