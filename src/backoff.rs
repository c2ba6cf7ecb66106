//! Backoff strategies for the retry policy.
//!
//! Attempt semantics: `delay(n)` is the wait after failed attempt `n` (1-indexed), i.e. the wait
//! that gates attempt `n + 1`. `delay(0)` is zero because nothing precedes the first attempt.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use iam_harvest::Backoff;
//!
//! // 2^n seconds after failed attempt n
//! let backoff = Backoff::exponential(Duration::from_secs(2));
//! assert_eq!(backoff.delay(0), Duration::ZERO);
//! assert_eq!(backoff.delay(1), Duration::from_secs(2));
//! assert_eq!(backoff.delay(4), Duration::from_secs(16));
//! ```
//!
//! Computations that would overflow saturate to [`MAX_BACKOFF`].

use std::time::Duration;

/// Ceiling used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("with_max is only valid for exponential backoff")]
    ConstantDoesNotSupportMax,
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant { delay: Duration },
    Exponential { base: Duration, max: Option<Duration> },
}

/// Deterministic part of the wait between attempts; jitter is layered on top by the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant { delay } }
    }

    /// `base * 2^(n-1)` after failed attempt `n`.
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential { base, max: None } }
    }

    /// Cap an exponential backoff. Rejects constant backoff, zero, and `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        match &mut self.kind {
            BackoffKind::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
            BackoffKind::Constant { .. } => Err(BackoffError::ConstantDoesNotSupportMax),
        }
    }

    /// Delay after failed attempt `attempt` (1-indexed; 0 yields zero).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            BackoffKind::Constant { delay } => (*delay).min(MAX_BACKOFF),
            BackoffKind::Exponential { base, max } => {
                let exponent = (attempt - 1).min(u32::MAX as usize) as u32;
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier).min(MAX_BACKOFF.as_nanos());
                let raw = Duration::from_nanos(nanos as u64);
                max.map_or(raw, |m| raw.min(m))
            }
        }
    }
}

impl Default for Backoff {
    /// `2^n` seconds after failed attempt `n`.
    fn default() -> Self {
        Self::exponential(Duration::from_secs(2))
    }
}
