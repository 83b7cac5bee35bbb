//! Token Bucket limiting sends per time window

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Token Bucket for send rate limiting.
///
/// Holds at most `capacity` tokens and refills `capacity` tokens per
/// `window`, continuously. One send consumes one token.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    /// Maximum bucket capacity
    capacity: u32,
    /// Time to refill the whole bucket
    window: Duration,
}

#[derive(Debug)]
struct BucketState {
    /// Current number of tokens, fractional between refills
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket allowing `capacity` sends per `window`
    pub fn new(capacity: u32, window: Duration) -> Self {
        let capacity = capacity.max(1);

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity,
            window: window.max(Duration::from_millis(1)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn tokens_per_sec(&self) -> f64 {
        self.capacity as f64 / self.window.as_secs_f64()
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.tokens_per_sec()).min(self.capacity as f64);
        state.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Try to consume one token from the bucket.
    /// Returns true if a token was available, false otherwise.
    pub fn try_consume(&self) -> bool {
        self.try_consume_or_wait().is_ok()
    }

    /// Consume one token, or return how long until one is available
    fn try_consume_or_wait(&self) -> Result<(), Duration> {
        let mut state = self.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.tokens_per_sec()))
        }
    }

    /// Wait until a token is available, then consume it
    pub async fn acquire(&self) {
        loop {
            match self.try_consume_or_wait() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "Send rate limited");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Get the current number of whole tokens available
    pub fn available(&self) -> u32 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens.floor() as u32
    }
}
