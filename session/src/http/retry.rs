//! Fixed-delay retry policy.

use std::time::{Duration, SystemTime};

use reqwest_retry::{RetryDecision, RetryPolicy};

/// Retries failed requests after the same delay every time, up to a cap.
pub struct FixedDelayPolicy {
    max_retries: u32,
    delay: Duration,
}

impl FixedDelayPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl RetryPolicy for FixedDelayPolicy {
    fn should_retry(&self, _request_start_time: SystemTime, n_past_retries: u32) -> RetryDecision {
        if n_past_retries >= self.max_retries {
            RetryDecision::DoNotRetry
        } else {
            RetryDecision::Retry {
                execute_after: SystemTime::now() + self.delay,
            }
        }
    }
}
