use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::BackoffPolicy;

/// Maps a 1-based attempt number to the delay before that attempt.
pub type DelayFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// `base * 2^(attempt-1)`, capped at `max_delay_ms`.
pub fn exponential_backoff(policy: &BackoffPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let delay = policy
        .base_delay_ms
        .saturating_mul(1u64 << exponent)
        .min(policy.max_delay_ms);
    Duration::from_millis(delay)
}

/// Exponential backoff with up to 20% random jitter.
pub fn jittered_backoff(policy: BackoffPolicy) -> DelayFn {
    Arc::new(move |attempt| {
        let delay = exponential_backoff(&policy, attempt);
        let jitter_range = delay.as_millis() as u64 / 5;
        if jitter_range == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_range);
        delay + Duration::from_millis(jitter)
    })
}

/// Retries immediately. Useful for deterministic tests.
pub fn no_delay() -> DelayFn {
    Arc::new(|_| Duration::ZERO)
}
