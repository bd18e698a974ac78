//! Reconnect delays with jitter.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with up to 10% jitter, capped at `max_ms`.
///
/// With `base_ms == max_ms` every attempt waits the same (jittered) delay,
/// which is how the push receiver paces reconnects.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}

/// Constant reconnect delay: `delay_ms` plus jitter, on every attempt.
pub fn reconnect_delay(attempt: u32, delay_ms: u64) -> Duration {
    calculate_backoff(attempt.max(1), delay_ms, delay_ms)
}
