//! Throttling bands, lock durations and key derivation.
//!
//! All limiter keys are built here so the IP window, the account window, the
//! failure counter and the lock flag can never drift apart between callers.

use std::time::Duration;

/// Failures at which an explicit lock is placed on the account.
pub const LOCK_THRESHOLD: u64 = 5;

/// How long the failure counter survives without new failures.
pub const FAILURE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Allowed login attempts per window for an account with `failures` recent failures.
///
/// Monotonic: more failures never yields a more generous band.
#[must_use]
pub const fn account_band(failures: u64) -> (u32, Duration) {
    match failures {
        0..=2 => (10, Duration::from_secs(60)),
        3..=4 => (5, Duration::from_secs(60)),
        5..=9 => (2, Duration::from_secs(60)),
        _ => (1, Duration::from_secs(5 * 60)),
    }
}

/// Lock length once `failures` reached [`LOCK_THRESHOLD`].
#[must_use]
pub const fn lock_duration(failures: u64) -> Option<Duration> {
    match failures {
        0..=4 => None,
        5..=9 => Some(Duration::from_secs(15 * 60)),
        10..=19 => Some(Duration::from_secs(60 * 60)),
        _ => Some(Duration::from_secs(24 * 60 * 60)),
    }
}

pub(crate) fn ip_route_key(ip: &str, route: &str) -> String {
    format!("rate_limit:{ip}:{route}")
}

pub(crate) fn failures_key(email: &str) -> String {
    format!("failed_attempts:{email}")
}

pub(crate) fn lock_key(email: &str) -> String {
    format!("account_block:{email}")
}

pub(crate) fn account_window_key(email: &str) -> String {
    format!("account_rate_limit:{email}")
}

/// Every account-scoped key, cleared together after a successful login.
pub(crate) fn account_keys(email: &str) -> [String; 3] {
    [
        failures_key(email),
        lock_key(email),
        account_window_key(email),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_shrink_as_failures_grow() {
        let mut previous = account_band(0);
        for failures in 1..40 {
            let band = account_band(failures);
            let previous_rate = f64::from(previous.0) / previous.1.as_secs_f64();
            let rate = f64::from(band.0) / band.1.as_secs_f64();
            assert!(rate <= previous_rate, "band widened at {failures}");
            previous = band;
        }
        assert_eq!(account_band(2), (10, Duration::from_secs(60)));
        assert_eq!(account_band(3), (5, Duration::from_secs(60)));
        assert_eq!(account_band(5), (2, Duration::from_secs(60)));
        assert_eq!(account_band(10), (1, Duration::from_secs(300)));
    }

    #[test]
    fn lock_grows_with_failures() {
        assert_eq!(lock_duration(4), None);
        assert_eq!(lock_duration(5), Some(Duration::from_secs(900)));
        assert_eq!(lock_duration(10), Some(Duration::from_secs(3600)));
        assert_eq!(lock_duration(20), Some(Duration::from_secs(86_400)));
        assert_eq!(lock_duration(500), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn account_keys_share_the_email() {
        let keys = account_keys("alice@example.com");
        assert_eq!(keys[0], "failed_attempts:alice@example.com");
        assert_eq!(keys[1], "account_block:alice@example.com");
        assert_eq!(keys[2], "account_rate_limit:alice@example.com");
        assert_eq!(
            ip_route_key("203.0.113.9", "/login"),
            "rate_limit:203.0.113.9:/login"
        );
    }
}
