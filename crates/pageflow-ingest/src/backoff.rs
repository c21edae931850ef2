//! Retry eligibility and backoff timing
//!
//! Classification and delay computation are pure; the only randomness is the
//! jitter factor, which [`BackoffPolicy::delay_with_factor`] takes explicitly
//! so the arithmetic can be tested without a random source.

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

use crate::transport::TransportError;

/// Default number of attempts per page (first try included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default upper bound of the pre-jitter delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter range applied as a multiplier
pub const DEFAULT_JITTER_LOW: f64 = 0.5;
pub const DEFAULT_JITTER_HIGH: f64 = 1.5;

/// How a failed attempt should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Transient; `hint` is a server-provided minimum wait
    Retryable { hint: Option<Duration> },
    /// Not worth retrying; the run must stop
    Fatal,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Classification::Retryable { .. })
    }
}

/// Exponential backoff with multiplicative jitter
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_low: f64,
    pub jitter_high: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_low: DEFAULT_JITTER_LOW,
            jitter_high: DEFAULT_JITTER_HIGH,
        }
    }
}

impl BackoffPolicy {
    /// Classify an HTTP error status.
    ///
    /// 429 and 5xx are transient (a 429 `Retry-After` becomes the hint);
    /// 408 is treated like a transport timeout. Every other non-2xx status is
    /// fatal, which covers 400, 401, 403 and 404.
    pub fn classify(status: u16, headers: &HeaderMap) -> Classification {
        match status {
            429 => Classification::Retryable {
                hint: parse_retry_after(headers, Utc::now()),
            },
            408 | 500..=599 => Classification::Retryable { hint: None },
            _ => Classification::Fatal,
        }
    }

    /// Classify a failure that never produced an HTTP status
    pub fn classify_transport(error: &TransportError) -> Classification {
        match error {
            TransportError::Timeout | TransportError::Network(_) => {
                Classification::Retryable { hint: None }
            },
            TransportError::InvalidRequest(_) => Classification::Fatal,
        }
    }

    /// `min(base * 2^attempt, cap)`, saturating at the cap on overflow
    pub fn base_delay(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Delay for `attempt` (0 = first retry) with an explicit jitter factor.
    /// The factor is clamped into the configured jitter range.
    pub fn delay_with_factor(
        &self,
        attempt: u32,
        classification: Classification,
        factor: f64,
    ) -> Duration {
        let Classification::Retryable { hint } = classification else {
            return Duration::ZERO;
        };

        let (low, high) = self.jitter_range();
        let factor = if factor.is_nan() { low } else { factor.clamp(low, high) };
        let secs = self.base_delay(attempt).as_secs_f64() * factor;
        let jittered = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);

        match hint {
            Some(floor) => jittered.max(floor),
            None => jittered,
        }
    }

    /// Delay for `attempt` with a uniformly drawn jitter factor
    pub fn next_delay(&self, attempt: u32, classification: Classification) -> Duration {
        let (low, high) = self.jitter_range();
        let factor = if high > low {
            rand::thread_rng().gen_range(low..=high)
        } else {
            low
        };
        self.delay_with_factor(attempt, classification, factor)
    }

    /// Jitter bounds as `(low, high)` with `0 <= low <= high`. A range with a
    /// non-finite bound degrades to no jitter.
    fn jitter_range(&self) -> (f64, f64) {
        let (a, b) = (self.jitter_low, self.jitter_high);
        if !(a.is_finite() && b.is_finite()) {
            return (1.0, 1.0);
        }
        let low = a.min(b).max(0.0);
        (low, a.max(b).max(low))
    }

    /// Whether a page that has failed `attempt` times must stop retrying
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.base_delay > self.max_delay {
            return Err(format!(
                "base delay ({:?}) cannot exceed max delay ({:?})",
                self.base_delay, self.max_delay
            ));
        }
        if !(self.jitter_low > 0.0 && self.jitter_low <= self.jitter_high) {
            return Err(format!(
                "jitter range [{}, {}] must satisfy 0 < low <= high",
                self.jitter_low, self.jitter_high
            ));
        }
        if !self.jitter_high.is_finite() {
            return Err("jitter upper bound must be finite".to_string());
        }
        Ok(())
    }
}

/// Parse `Retry-After` as delta-seconds (fractions allowed) or an HTTP-date.
///
/// Negative values and values too large for a [`Duration`] are ignored, so
/// the regular backoff applies instead.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(secs) = raw.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use reqwest::header::HeaderValue;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter_low: 0.5,
            jitter_high: 1.5,
        }
    }

    fn retry_after(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_classify_transient_statuses() {
        let headers = HeaderMap::new();
        for status in [500, 502, 503, 504, 408] {
            assert_eq!(
                BackoffPolicy::classify(status, &headers),
                Classification::Retryable { hint: None },
                "status {status}"
            );
        }
    }

    #[test]
    fn test_classify_fatal_statuses() {
        let headers = HeaderMap::new();
        for status in [400, 401, 403, 404, 422] {
            assert_eq!(BackoffPolicy::classify(status, &headers), Classification::Fatal);
        }
    }

    #[test]
    fn test_classify_rate_limit_with_hint() {
        let class = BackoffPolicy::classify(429, &retry_after("5"));
        assert_eq!(
            class,
            Classification::Retryable {
                hint: Some(Duration::from_secs(5))
            }
        );

        let no_hint = BackoffPolicy::classify(429, &HeaderMap::new());
        assert_eq!(no_hint, Classification::Retryable { hint: None });
    }

    #[test]
    fn test_classify_transport_errors() {
        assert!(BackoffPolicy::classify_transport(&TransportError::Timeout).is_retryable());
        assert!(
            BackoffPolicy::classify_transport(&TransportError::Network("reset".into()))
                .is_retryable()
        );
        assert_eq!(
            BackoffPolicy::classify_transport(&TransportError::InvalidRequest("bad url".into())),
            Classification::Fatal
        );
    }

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.base_delay(0), Duration::from_millis(100));
        assert_eq!(p.base_delay(1), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(800));
        assert_eq!(p.base_delay(5), Duration::from_secs(2));
        assert_eq!(p.base_delay(64), Duration::from_secs(2));
    }

    #[test]
    fn test_hint_is_a_floor() {
        let p = policy();
        let class = Classification::Retryable {
            hint: Some(Duration::from_secs(5)),
        };
        assert_eq!(p.delay_with_factor(0, class, 0.5), Duration::from_secs(5));

        let small_hint = Classification::Retryable {
            hint: Some(Duration::from_millis(10)),
        };
        assert_eq!(p.delay_with_factor(2, small_hint, 1.0), Duration::from_millis(400));
    }

    #[test]
    fn test_factor_is_clamped_to_jitter_range() {
        let p = policy();
        let class = Classification::Retryable { hint: None };
        assert_eq!(p.delay_with_factor(0, class, 10.0), Duration::from_millis(150));
        assert_eq!(p.delay_with_factor(0, class, 0.0), Duration::from_millis(50));
    }

    #[test]
    fn test_fatal_has_no_delay() {
        assert_eq!(policy().next_delay(3, Classification::Fatal), Duration::ZERO);
    }

    #[test]
    fn test_exhausted() {
        let p = policy();
        assert!(!p.exhausted(4));
        assert!(p.exhausted(5));
        assert!(p.exhausted(6));
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());
        assert!(BackoffPolicy {
            max_attempts: 0,
            ..policy()
        }
        .validate()
        .is_err());
        assert!(BackoffPolicy {
            jitter_low: 1.5,
            jitter_high: 0.5,
            ..policy()
        }
        .validate()
        .is_err());
        assert!(BackoffPolicy {
            base_delay: Duration::from_secs(60),
            ..policy()
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        let headers = retry_after("Wed, 21 Oct 2015 07:28:07 GMT");
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(7)));

        let past = retry_after("Wed, 21 Oct 2015 07:27:00 GMT");
        assert_eq!(parse_retry_after(&past, now), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after(&retry_after("soon"), Utc::now()), None);
        assert_eq!(parse_retry_after(&retry_after("-3"), Utc::now()), None);
        assert_eq!(parse_retry_after(&HeaderMap::new(), Utc::now()), None);
        assert_eq!(parse_retry_after(&retry_after("NaN"), Utc::now()), None);
    }

    #[test]
    fn test_oversized_retry_after_falls_back_to_backoff() {
        let headers = retry_after("99999999999999999999");
        assert_eq!(parse_retry_after(&headers, Utc::now()), None);
        assert_eq!(
            BackoffPolicy::classify(429, &headers),
            Classification::Retryable { hint: None }
        );
    }

    #[test]
    fn test_inverted_or_invalid_jitter_does_not_panic() {
        let class = Classification::Retryable { hint: None };

        let inverted = BackoffPolicy {
            jitter_low: 1.5,
            jitter_high: 0.5,
            ..policy()
        };
        assert_eq!(inverted.delay_with_factor(0, class, 10.0), Duration::from_millis(150));
        let delay = inverted.next_delay(0, class);
        assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));

        let nan = BackoffPolicy {
            jitter_low: f64::NAN,
            ..policy()
        };
        assert_eq!(nan.next_delay(1, class), Duration::from_millis(200));
        assert_eq!(policy().delay_with_factor(0, class, f64::NAN), Duration::from_millis(50));

        let huge = BackoffPolicy {
            max_delay: Duration::MAX,
            base_delay: Duration::MAX,
            ..policy()
        };
        assert_eq!(huge.delay_with_factor(0, class, 1.5), Duration::MAX);
    }

    proptest! {
        #[test]
        fn prop_base_delay_is_monotonic_and_capped(attempt in 0u32..80) {
            let p = policy();
            prop_assert!(p.base_delay(attempt + 1) >= p.base_delay(attempt));
            prop_assert!(p.base_delay(attempt) <= p.max_delay);
        }

        #[test]
        fn prop_jittered_delay_within_bounds(attempt in 0u32..20) {
            let p = policy();
            let class = Classification::Retryable { hint: None };
            let delay = p.next_delay(attempt, class);
            let base = p.base_delay(attempt);
            prop_assert!(delay >= base.mul_f64(p.jitter_low));
            prop_assert!(delay <= base.mul_f64(p.jitter_high));
        }

        #[test]
        fn prop_hint_never_undercut(attempt in 0u32..20, hint_ms in 0u64..60_000) {
            let hint = Duration::from_millis(hint_ms);
            let delay = policy().next_delay(attempt, Classification::Retryable { hint: Some(hint) });
            prop_assert!(delay >= hint);
        }
    }
}
