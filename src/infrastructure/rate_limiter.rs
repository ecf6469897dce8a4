use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Minimum-interval rate limiter for price fetches.
///
/// Callers `acquire()` before each request; the limiter sleeps out the
/// remainder of the interval so concurrent trackers cannot exceed the
/// provider's declared rate hint.
pub struct IntervalLimiter {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl IntervalLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spaces_out_acquires() {
        let limiter = IntervalLimiter::new(Duration::from_millis(50));

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;

        // Two full intervals must have elapsed for three acquires
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_first_acquire_is_immediate() {
        let limiter = IntervalLimiter::new(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
