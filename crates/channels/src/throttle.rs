//! Token-bucket admission for channel sends.
//!
//! The bucket holds `capacity` tokens and is topped back up to capacity once
//! per refill interval, so sends are admitted in batches of at most
//! `capacity` per interval. An empty bucket makes callers wait for the next
//! refill instead of failing.

use std::time::Duration;

use campaign_core::config::ChannelLimits;
use parking_lot::Mutex;
use tokio::time::Instant;

pub struct TokenBucket {
    capacity: u32,
    interval: Duration,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        let capacity = capacity.max(1);
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        Self {
            capacity,
            interval,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_limits(limits: &ChannelLimits) -> Self {
        Self::new(limits.max_sends, limits.refill_interval())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Takes one token, or returns the instant of the next refill.
    pub fn try_acquire(&self) -> Result<(), Instant> {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens > 0 {
            state.tokens -= 1;
            Ok(())
        } else {
            Err(state.last_refill + self.interval)
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        loop {
            match self.try_acquire() {
                Ok(()) => return,
                Err(next_refill) => tokio::time::sleep_until(next_refill).await,
            }
        }
    }

    pub fn available(&self) -> u32 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let intervals = (elapsed.as_nanos() / self.interval.as_nanos()).min(u32::MAX as u128) as u32;
        if intervals > 0 {
            state.tokens = self.capacity;
            state.last_refill += self.interval * intervals;
        }
    }
}
