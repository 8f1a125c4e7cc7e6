//! Sliding-window request cap shared across all callers of a search adapter
//! instance (§5: "Nothing else applies global rate limiting — adapters are
//! responsible for their own upstream courtesy.")

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    pub fn per_minute(max_per_minute: u32) -> Self {
        Self::new(max_per_minute, Duration::from_secs(60))
    }

    /// Blocks (asynchronously) until the sliding window has room for one
    /// more request, then records that request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().expect("rate limiter lock poisoned");
                let now = Instant::now();
                while let Some(&front) = timestamps.front() {
                    if now.duration_since(front) >= self.window {
                        timestamps.pop_front();
                    } else {
                        break;
                    }
                }
                if (timestamps.len() as u32) < self.max_per_window {
                    timestamps.push_back(now);
                    None
                } else {
                    let oldest = *timestamps.front().expect("len checked above is > 0");
                    Some(self.window - now.duration_since(oldest))
                }
            };
            match wait {
                None => return,
                Some(duration) => tokio::time::sleep(duration).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_does_not_block_under_the_cap() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn acquire_waits_once_window_is_exhausted() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.acquire().await;
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
