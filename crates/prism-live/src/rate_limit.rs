//! Per-client inbound message rate limiting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use prism_config::RateLimitConfig;

/// Consulted once per received data message.
pub trait RateLimiter: Send {
    /// Record a message and report whether it is within the limit.
    fn allow(&mut self) -> bool;

    fn reset(&mut self);
}

/// Allows at most `max_messages` within any trailing `window`.
#[derive(Debug, Clone)]
pub struct SlidingWindowLimiter {
    max_messages: usize,
    window: Duration,
    hits: VecDeque<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            hits: VecDeque::with_capacity(max_messages.min(1024)),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_messages, config.window())
    }

    fn allow_at(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.hits.front() {
            if now.duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }

        if self.hits.len() >= self.max_messages {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    fn reset(&mut self) {
        self.hits.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_within_window() {
        let mut limiter = SlidingWindowLimiter::new(3, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start + Duration::from_secs(1)));
        assert!(limiter.allow_at(start + Duration::from_secs(2)));
        assert!(!limiter.allow_at(start + Duration::from_secs(3)));
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = SlidingWindowLimiter::new(2, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.allow_at(start));
        assert!(limiter.allow_at(start + Duration::from_secs(5)));
        assert!(!limiter.allow_at(start + Duration::from_secs(9)));
        // The first hit has left the window.
        assert!(limiter.allow_at(start + Duration::from_secs(10)));
        assert!(!limiter.allow_at(start + Duration::from_secs(11)));
    }

    #[test]
    fn test_rejected_messages_do_not_extend_window() {
        let mut limiter = SlidingWindowLimiter::new(1, Duration::from_secs(10));
        let start = Instant::now();

        assert!(limiter.allow_at(start));
        for offset in 1..10 {
            assert!(!limiter.allow_at(start + Duration::from_secs(offset)));
        }
        assert!(limiter.allow_at(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_reset() {
        let mut limiter = SlidingWindowLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(!limiter.allow());
        limiter.reset();
        assert!(limiter.allow());
    }
}
