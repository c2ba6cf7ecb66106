//! Error classification and the errors surfaced by the pagination engine.
//!
//! Transports classify their own failures at the boundary through [`Classify`]; the retry policy
//! and paginator never inspect transport-specific error shapes.

use std::fmt;

/// Failure class reported by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Rate-limit signal (HTTP 429 / "too many requests"); expected to succeed later.
    TransientRateLimit,
    /// Anything else: malformed request, auth failure, not-found, unclassified server error.
    Permanent,
}

impl ErrorClass {
    /// True for [`ErrorClass::TransientRateLimit`].
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::TransientRateLimit)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::TransientRateLimit => write!(f, "transient-rate-limit"),
            ErrorClass::Permanent => write!(f, "permanent"),
        }
    }
}

/// Implemented by transport errors so callers can tell rate limiting apart from hard failures.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

/// Terminal outcome of a pagination run.
///
/// Both variants discard whatever was accumulated before the failure.
#[derive(Debug, thiserror::Error)]
pub enum PaginationError<E>
where
    E: std::error::Error + 'static,
{
    /// A page fetch failed permanently or ran out of retries. `source` is the transport's own
    /// error, exactly as the last attempt produced it.
    #[error("failed to fetch IAM policies for {scope} after {pages_fetched} page(s): {source}")]
    Fetch {
        scope: String,
        pages_fetched: usize,
        #[source]
        source: E,
    },
    /// The caller cancelled the run before it completed.
    #[error("fetching IAM policies for {scope} was cancelled after {pages_fetched} page(s)")]
    Cancelled { scope: String, pages_fetched: usize },
}

impl<E> PaginationError<E>
where
    E: std::error::Error + 'static,
{
    /// Scope the failed run was walking.
    pub fn scope(&self) -> &str {
        match self {
            Self::Fetch { scope, .. } | Self::Cancelled { scope, .. } => scope,
        }
    }

    /// Number of pages that had been fetched successfully before the run stopped.
    pub fn pages_fetched(&self) -> usize {
        match self {
            Self::Fetch { pages_fetched, .. } | Self::Cancelled { pages_fetched, .. } => {
                *pages_fetched
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Borrow the transport error, if the run failed on a fetch.
    pub fn fetch_error(&self) -> Option<&E> {
        match self {
            Self::Fetch { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }

    /// Take the transport error, if the run failed on a fetch.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Fetch { source, .. } => Some(source),
            Self::Cancelled { .. } => None,
        }
    }
}

impl<E> PaginationError<E>
where
    E: std::error::Error + Classify + 'static,
{
    /// Classification of the underlying fetch error. A transient class here means the retry
    /// budget ran out.
    pub fn class(&self) -> Option<ErrorClass> {
        self.fetch_error().map(Classify::class)
    }
}
