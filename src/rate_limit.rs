//! Sliding-window request limiter.

use log::debug;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// At most `max_requests` attempts per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: usize,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

/// Hands out request slots, waiting when the window is full.
pub struct RateLimiter {
    limit: RateLimit,
    slots: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit: RateLimit {
                max_requests: limit.max_requests.max(1),
                window: limit.window,
            },
            slots: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a slot is free, then takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut slots = self.slots.lock().await;
                let now = Instant::now();
                while slots
                    .front()
                    .is_some_and(|taken| now.duration_since(*taken) >= self.limit.window)
                {
                    slots.pop_front();
                }

                match slots.front() {
                    Some(oldest) if slots.len() >= self.limit.max_requests => {
                        self.limit.window - now.duration_since(*oldest)
                    }
                    _ => {
                        slots.push_back(now);
                        return;
                    }
                }
            };

            debug!("Rate limit reached, waiting {}ms for a slot", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// Slots taken within the current window.
    pub async fn in_use(&self) -> usize {
        let slots = self.slots.lock().await;
        let now = Instant::now();
        slots
            .iter()
            .filter(|taken| now.duration_since(**taken) < self.limit.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_limit_does_not_wait() {
        let limiter = RateLimiter::new(RateLimit {
            max_requests: 3,
            window: Duration::from_secs(10),
        });
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_use().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_oldest_slot() {
        let limiter = RateLimiter::new(RateLimit {
            max_requests: 2,
            window: Duration::from_secs(10),
        });
        let start = Instant::now();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(4)).await;
        limiter.acquire().await;

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_slots_are_released() {
        let limiter = RateLimiter::new(RateLimit {
            max_requests: 1,
            window: Duration::from_secs(1),
        });
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.in_use().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_is_treated_as_one() {
        let limiter = RateLimiter::new(RateLimit {
            max_requests: 0,
            window: Duration::from_secs(1),
        });
        limiter.acquire().await;
        assert_eq!(limiter.in_use().await, 1);
    }
}
