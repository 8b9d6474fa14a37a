use std::sync::Mutex;

use tokio::time::{Duration, Instant, sleep};

/// Longest single sleep between two acquisition attempts.
const MAX_POLL: Duration = Duration::from_millis(100);

/// Token-bucket admission control shared by every request of one
/// provider session.
///
/// DESIGN:
/// - Lazy refill: tokens are topped up from elapsed time on each call
/// - `burst` tokens available immediately, then `rate` per second
/// - Waiters poll; there is no FIFO fairness between them
///
/// THREAD SAFETY:
/// - The bucket state sits behind a std mutex that is never held
///   across an await point, so a limiter can be shared via `Arc`
///
/// Time is read from tokio's clock, which makes the limiter
/// deterministic under `tokio::time::pause`.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a full bucket.
    ///
    /// `requests_per_second` must be positive; `burst` is clamped to 1.
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: requests_per_second.max(f64::MIN_POSITIVE),
            burst,
            state: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Tries to take one token, waiting at most `timeout`.
    ///
    /// Returns `false` when the deadline passes without a grant.
    pub async fn acquire(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = match self.try_take() {
                Ok(()) => return true,
                Err(wait) => wait,
            };

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(wait.min(MAX_POLL).min(deadline - now)).await;
        }
    }

    /// Blocks until a token is granted.
    pub async fn wait(&self) {
        while !self.acquire(Duration::from_secs(30)).await {
            sleep(MAX_POLL).await;
        }
    }

    /// Refills, then either consumes a token or reports how long until
    /// the next one accrues.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            // round up to the next millisecond so the retry lands after the token
            let millis = (missing / self.rate * 1000.0).ceil().max(1.0);
            Err(Duration::from_millis(millis as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn burst_then_steady_rate() {
        // rate 10/s, burst 3: five back-to-back calls
        let limiter = RateLimiter::new(10.0, 3);
        let start = Instant::now();
        let mut grants = Vec::new();
        for _ in 0..5 {
            limiter.wait().await;
            grants.push(start.elapsed());
        }

        for g in &grants[..3] {
            assert_eq!(*g, Duration::ZERO);
        }
        let interval = Duration::from_millis(100);
        assert!(grants[3] >= interval, "4th grant at {:?}", grants[3]);
        assert!(grants[4] - grants[3] >= interval - Duration::from_millis(1));
        // tolerance: granted no later than one poll after the token accrues
        assert!(grants[4] <= Duration::from_millis(220), "5th grant at {:?}", grants[4]);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_times_out_when_empty() {
        let limiter = RateLimiter::new(0.5, 1);
        assert!(limiter.acquire(Duration::from_millis(10)).await);
        assert!(!limiter.acquire(Duration::from_millis(500)).await);
        // after two seconds a token is back
        sleep(Duration::from_secs(2)).await;
        assert!(limiter.acquire(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(100.0, 2);
        sleep(Duration::from_secs(60)).await;
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(limiter.acquire(Duration::ZERO).await);
        assert!(!limiter.acquire(Duration::ZERO).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_between_tasks() {
        let limiter = Arc::new(RateLimiter::new(20.0, 4));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.wait().await;
                Instant::now()
            }));
        }
        let mut last = start;
        for h in handles {
            last = last.max(h.await.unwrap());
        }
        // 4 immediately, 4 more at 50ms spacing
        assert!(last - start >= Duration::from_millis(200));
    }
}
