//! # Utilities Module
//!
//! Small helpers shared across the backend.

use chrono::{DateTime, Utc};

/// Wall-clock delay from now until `instant`, for handing to
/// `tokio::time::sleep`. An instant already in the past yields a
/// zero delay (the timer fires immediately).
pub fn duration_until(instant: DateTime<Utc>) -> std::time::Duration {
    (instant - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_duration_until_future() {
        let delay = duration_until(Utc::now() + Duration::seconds(10));
        assert!(delay > std::time::Duration::from_secs(8));
        assert!(delay <= std::time::Duration::from_secs(10));
    }

    #[test]
    fn test_duration_until_past_is_zero() {
        let delay = duration_until(Utc::now() - Duration::seconds(10));
        assert_eq!(delay, std::time::Duration::ZERO);
    }
}
