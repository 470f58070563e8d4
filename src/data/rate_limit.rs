//! Token-bucket rate limiter shared by all tasks of one provider instance.
//!
//! The bucket is the single synchronization point for outbound requests: a
//! waiter holds the internal lock while it sleeps, so concurrent callers
//! drain tokens strictly one at a time.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `capacity` tokens of burst, refilled at `refill_rate` tokens/second.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_rate: refill_rate.max(f64::EPSILON),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket sized for a requests-per-minute budget: burst = 10 % of the
    /// budget (at least 1), refill = budget spread over the minute.
    pub fn for_requests_per_minute(rpm: u32) -> Self {
        Self::new((rpm / 10).max(1), f64::from(rpm) / 60.0)
    }

    /// Take `tokens` if immediately available.
    pub async fn acquire(&self, tokens: f64) -> bool {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens >= tokens {
            state.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Wait until one token is available, then take it.
    pub async fn wait_for_token(&self) {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        if state.tokens < 1.0 {
            let wait_secs = (1.0 - state.tokens) / self.refill_rate;
            sleep(Duration::from_secs_f64(wait_secs)).await;
            self.refill(&mut state);
        }
        state.tokens -= 1.0;
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpm_bucket_parameters() {
        let bucket = TokenBucket::for_requests_per_minute(200);
        assert!((bucket.capacity - 20.0).abs() < f64::EPSILON);
        assert!((bucket.refill_rate - 200.0 / 60.0).abs() < 1e-10);

        // Free tier still gets a burst of one
        let bucket = TokenBucket::for_requests_per_minute(5);
        assert!((bucket.capacity - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn burst_then_deny() {
        let bucket = TokenBucket::new(3, 1.0);
        assert!(bucket.acquire(1.0).await);
        assert!(bucket.acquire(1.0).await);
        assert!(bucket.acquire(1.0).await);
        assert!(!bucket.acquire(1.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_restores_tokens() {
        let bucket = TokenBucket::new(2, 1.0);
        assert!(bucket.acquire(2.0).await);
        assert!(!bucket.acquire(1.0).await);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.acquire(1.0).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_token_blocks_until_refill() {
        let bucket = TokenBucket::new(1, 2.0);
        bucket.wait_for_token().await; // consumes the burst token

        let start = Instant::now();
        bucket.wait_for_token().await;
        // refill rate 2/s -> roughly half a second for the next token
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(400), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_cap_at_capacity() {
        let bucket = TokenBucket::new(2, 10.0);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(bucket.acquire(2.0).await);
        assert!(!bucket.acquire(1.0).await);
    }
}
