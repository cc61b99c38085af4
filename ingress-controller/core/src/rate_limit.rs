use tokio::time::{self, Duration, Instant};

const MIN_WAIT: Duration = Duration::from_millis(1);

/// A token bucket that gates how often the proxy configuration may be recomputed.
///
/// The bucket starts full, so the first `burst` acquisitions complete immediately.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum InvalidRate {
    #[error("rate must be a positive, finite number of tokens per second: {0}")]
    Rate(f64),

    #[error("burst must be at least 1")]
    Burst,
}

// === impl TokenBucket ===

impl TokenBucket {
    pub fn new(rate: f64, burst: u32) -> Result<Self, InvalidRate> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(InvalidRate::Rate(rate));
        }
        if burst == 0 {
            return Err(InvalidRate::Burst);
        }
        let burst = f64::from(burst);
        Ok(Self {
            rate,
            burst,
            tokens: burst,
            last: Instant::now(),
        })
    }

    /// Takes a token if one is available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return true;
        }
        false
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&mut self) {
        while !self.try_acquire() {
            // Rounding may leave the bucket a hair short of a token; never sleep for zero.
            let wait = Duration::from_secs_f64((1.0 - self.tokens) / self.rate);
            time::sleep(wait.max(MIN_WAIT)).await;
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        self.last = now;
    }
}
