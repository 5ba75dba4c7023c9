//! Backoff schedule for rejoining after a dropped connection.

use std::time::Duration;

use rand::Rng;
use spaces_config::schema::ReconnectConfig;

/// Delay before rejoin attempt `attempt` (zero-based): the base delay
/// doubled per attempt, capped at the maximum, optionally shortened by up
/// to a quarter at random.
pub(crate) fn backoff_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    let delay = config
        .base_delay()
        .saturating_mul(factor)
        .min(config.max_delay());
    if config.jitter {
        delay.mul_f64(rand::thread_rng().gen_range(0.75..=1.0))
    } else {
        delay
    }
}
