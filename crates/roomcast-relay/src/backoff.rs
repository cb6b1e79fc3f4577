use std::time::Duration;

use rand::Rng;

const BASE_MS: u64 = 100;
const MAX_MS: u64 = 5_000;

/// Delay before retry number `attempt` (0-based): exponential from 100ms,
/// capped at 5s, plus up to 25% random jitter so instances don't
/// reconnect in lockstep.
pub(crate) fn backoff(attempt: u32) -> Duration {
    let base = BASE_MS.saturating_mul(1 << attempt.min(6)).min(MAX_MS);
    let jitter = rand::rng().random_range(0..=base / 4);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let first = backoff(0);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(125));

        let third = backoff(2);
        assert!(third >= Duration::from_millis(400));

        for attempt in [10, 31, u32::MAX] {
            let capped = backoff(attempt);
            assert!(capped >= Duration::from_millis(MAX_MS));
            assert!(capped <= Duration::from_millis(MAX_MS + MAX_MS / 4));
        }
    }
}
