//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before retry number `attempt` (1-based), capped at `max_ms` plus up
/// to 10% jitter. Attempt 0 means no delay.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        assert_eq!(calculate_backoff(0, 1_000, 30_000), Duration::ZERO);

        let first = calculate_backoff(1, 1_000, 30_000);
        assert!(first >= Duration::from_millis(1_000) && first < Duration::from_millis(1_100));

        let third = calculate_backoff(3, 1_000, 30_000);
        assert!(third >= Duration::from_millis(4_000));

        let capped = calculate_backoff(40, 1_000, 30_000);
        assert!(capped >= Duration::from_millis(30_000) && capped < Duration::from_millis(33_000));
    }
}
