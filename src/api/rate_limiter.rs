//! Upstream request rate limiting
//!
//! The upstream API caps request frequency per trailing window. The limiter
//! keeps a sliding window of recent request timestamps and stalls callers
//! until one more request fits. Stalling is the backpressure mechanism:
//! there is no queue, the caller simply waits.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window rate limiter
///
/// Safe for concurrent callers: the window is mutex-guarded, and the
/// stall-and-recheck loop means several stalled callers wake and re-contend
/// rather than all being admitted at once.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    stall_interval: Duration,
    recent: Mutex<Vec<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration, stall_interval: Duration) -> Self {
        Self {
            max_requests,
            window,
            stall_interval,
            recent: Mutex::new(Vec::new()),
        }
    }

    /// Block until issuing one more request stays within the limit.
    ///
    /// Never fails, only delays. On return, the admitted request's timestamp
    /// has been recorded in the window.
    pub async fn admit(&self) {
        loop {
            {
                let mut recent = self.recent.lock();
                let now = Instant::now();
                recent.retain(|t| now.duration_since(*t) < self.window);
                if recent.len() < self.max_requests {
                    recent.push(now);
                    return;
                }
            }
            tracing::info!("Stalled because of too many requests");
            tokio::time::sleep(self.stall_interval).await;
        }
    }

    /// Number of requests currently inside the window.
    pub fn recent_count(&self) -> usize {
        let mut recent = self.recent.lock();
        let now = Instant::now();
        recent.retain(|t| now.duration_since(*t) < self.window);
        recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_admits_below_limit_without_delay() {
        let limiter = RateLimiter::new(
            3,
            Duration::from_secs(60),
            Duration::from_millis(50),
        );

        let started = Instant::now();
        for _ in 0..3 {
            limiter.admit().await;
        }
        assert!(started.elapsed() < Duration::from_millis(40));
        assert_eq!(limiter.recent_count(), 3);
    }

    #[tokio::test]
    async fn test_stalls_when_window_saturated() {
        let stall = Duration::from_millis(50);
        let limiter = RateLimiter::new(2, Duration::from_millis(200), stall);

        limiter.admit().await;
        limiter.admit().await;

        // Window is full: the third call must stall at least once before
        // the oldest timestamp ages out.
        let started = Instant::now();
        limiter.admit().await;
        assert!(started.elapsed() >= stall);
    }

    #[tokio::test]
    async fn test_window_expiry_frees_capacity() {
        let limiter = RateLimiter::new(
            1,
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        limiter.admit().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.recent_count(), 0);

        let started = Instant::now();
        limiter.admit().await;
        assert!(started.elapsed() < Duration::from_millis(10));
    }
}
