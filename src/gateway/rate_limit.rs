use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::logger::{self, LogTag};

/// Sliding-window rate limiter guarding the venue's request budget.
pub struct RateLimiter {
    requests: Mutex<VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            max_requests,
            window,
        }
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let mut requests = self.requests.lock().await;
            let now = Instant::now();

            while let Some(&front) = requests.front() {
                if now.duration_since(front) <= self.window {
                    break;
                }
                requests.pop_front();
            }

            if requests.len() >= self.max_requests {
                if let Some(&oldest) = requests.front() {
                    let wait = self.window.saturating_sub(now.duration_since(oldest));
                    if !wait.is_zero() {
                        drop(requests);
                        logger::debug(
                            LogTag::Gateway,
                            &format!("rate limit reached, waiting {:.1}s", wait.as_secs_f64()),
                        );
                        tokio::time::sleep(wait).await;
                        continue;
                    }
                }
            }

            requests.push_back(now);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_burst_up_to_limit() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn delays_when_window_is_full() {
        let limiter = RateLimiter::new(2, Duration::from_millis(200));
        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
