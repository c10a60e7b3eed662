// Retry Module
// Bounded attempt counter with optional exponential delay between attempts

// Import Embassy time utilities
use embassy_time::Duration;

// Import serde so policies can live in the persisted configuration
use serde::{Deserialize, Serialize};

use crate::time::TimeSource;

// Default policy constants
const DEFAULT_MAX_ATTEMPTS: u32 = 3; // Attempts per stage entry

/// How many times a stage retries and how long it waits between attempts.
///
/// The delay before attempt `n` starts at `initial_delay_ms` and doubles each attempt, capped at
/// `max_delay_ms`. With `delay_first_attempt` unset the first attempt runs immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub delay_first_attempt: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::immediate(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Back-to-back attempts with no delay
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            delay_first_attempt: false,
        }
    }

    /// Same pause before every attempt, including the first
    pub const fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            delay_first_attempt: true,
        }
    }

    /// Delay to wait before the 1-based `attempt`
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let doublings = match (attempt, self.delay_first_attempt) {
            (0, _) | (1, false) => return Duration::from_millis(0),
            (n, true) => n - 1,
            (n, false) => n - 2,
        };

        let mut delay_ms = self.initial_delay_ms;
        for _ in 0..doublings {
            delay_ms = delay_ms.saturating_mul(2);
            if delay_ms >= self.max_delay_ms {
                break;
            }
        }
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Attempt counter for one stage entry. Create a fresh one every time a stage is entered.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Wait out the delay for the next attempt and return its 1-based number,
    /// or `None` once the policy is exhausted.
    pub async fn next_attempt<T: TimeSource>(&mut self, time: &T) -> Option<u32> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.policy.delay_before(self.attempts);
        if delay.as_ticks() > 0 {
            time.sleep(delay).await;
        }
        Some(self.attempts)
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempts
    }
}
