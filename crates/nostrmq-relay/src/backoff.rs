use std::time::Duration;

const BASE: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(30);
pub const MAX_ATTEMPTS: u32 = 10;

/// Exponential backoff: `base * 2^attempt`, capped at 30s. `attempt` is the
/// number of reconnect attempts already made (0 before the first retry).
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    BASE.checked_mul(factor.min(u32::MAX as u64) as u32)
        .unwrap_or(CAP)
        .min(CAP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_cap() {
        assert_eq!(delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(delay_for_attempt(20), Duration::from_secs(30));
    }
}
