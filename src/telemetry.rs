//! Observability for the retry policy and paginator.
//!
//! Both components describe what they decide as [`HarvestEvent`]s and hand them to an injected
//! [`Observer`]. Observers are called synchronously and cannot influence control flow.
//!
//! # Event Types
//!
//! - **Retry**: `Scheduled`, `Rejected`, `Exhausted`, `Interrupted`
//! - **Page**: `Fetched`, `Completed`, `Aborted`
//!
//! ```rust
//! use iam_harvest::telemetry::{HarvestEvent, MemoryObserver, Observer, RetryEvent};
//! use std::time::Duration;
//!
//! let observer = MemoryObserver::new();
//! observer.observe(&HarvestEvent::Retry(RetryEvent::Scheduled {
//!     attempt: 1,
//!     delay: Duration::from_millis(2400),
//!     error: "429 Too Many Requests".into(),
//! }));
//! assert_eq!(observer.len(), 1);
//! ```

use crate::error::ErrorClass;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Events emitted while fetching.
#[derive(Debug, Clone, PartialEq)]
pub enum HarvestEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Paginator events
    Page(PageEvent),
}

/// Decisions taken by the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// Attempt `attempt` hit a transient failure; the next attempt starts after `delay`.
    Scheduled {
        /// The attempt that failed (1-indexed)
        attempt: usize,
        delay: Duration,
        error: String,
    },
    /// The failure was not retryable; it is returned as-is.
    Rejected { attempt: usize, class: ErrorClass, error: String },
    /// Every attempt failed transiently; the last error is returned as-is.
    Exhausted { attempts: usize, error: String },
    /// Cancellation fired during a backoff wait.
    Interrupted { attempt: usize, error: String },
}

/// Progress of a pagination run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// Page `page` (1-indexed) arrived with `items` records.
    Fetched { scope: String, page: usize, items: usize, has_more: bool },
    /// The API reported no further cursor.
    Completed { scope: String, pages: usize, items: usize },
    /// The run stopped early; accumulated records were dropped.
    Aborted { scope: String, pages: usize, reason: String },
}

impl fmt::Display for HarvestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarvestEvent::Retry(event) => write!(f, "Retry::{}", event),
            HarvestEvent::Page(event) => write!(f, "Page::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Scheduled { attempt, delay, .. } => {
                write!(f, "Scheduled(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Rejected { attempt, class, .. } => {
                write!(f, "Rejected(#{}, class={})", attempt, class)
            }
            RetryEvent::Exhausted { attempts, .. } => write!(f, "Exhausted(attempts={})", attempts),
            RetryEvent::Interrupted { attempt, .. } => write!(f, "Interrupted(#{})", attempt),
        }
    }
}

impl fmt::Display for PageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageEvent::Fetched { page, items, has_more, .. } => {
                write!(f, "Fetched(page={}, items={}, more={})", page, items, has_more)
            }
            PageEvent::Completed { pages, items, .. } => {
                write!(f, "Completed(pages={}, items={})", pages, items)
            }
            PageEvent::Aborted { pages, .. } => write!(f, "Aborted(pages={})", pages),
        }
    }
}

/// Receives events. Implemented for any `Fn(&HarvestEvent) + Send + Sync`.
pub trait Observer: Send + Sync {
    fn observe(&self, event: &HarvestEvent);
}

impl<F> Observer for F
where
    F: Fn(&HarvestEvent) + Send + Sync,
{
    fn observe(&self, event: &HarvestEvent) {
        self(event)
    }
}

/// Discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn observe(&self, _event: &HarvestEvent) {}
}

/// Logs events through `tracing` with structured fields.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&self, event: &HarvestEvent) {
        match event {
            HarvestEvent::Retry(RetryEvent::Scheduled { attempt, delay, error }) => {
                tracing::warn!(
                    attempt,
                    delay_secs = delay.as_secs_f64(),
                    %error,
                    "rate limited; retrying in {:.2} seconds",
                    delay.as_secs_f64()
                );
            }
            HarvestEvent::Retry(RetryEvent::Rejected { attempt, class, error }) => {
                tracing::error!(attempt, %class, %error, "non-retryable search failure");
            }
            HarvestEvent::Retry(RetryEvent::Exhausted { attempts, error }) => {
                tracing::error!(attempts, %error, "rate limited on every attempt; giving up");
            }
            HarvestEvent::Retry(RetryEvent::Interrupted { attempt, error }) => {
                tracing::warn!(attempt, %error, "backoff interrupted by cancellation");
            }
            HarvestEvent::Page(PageEvent::Fetched { scope, page, items, has_more }) => {
                tracing::debug!(%scope, page, items, has_more, "fetched page");
            }
            HarvestEvent::Page(PageEvent::Completed { scope, pages, items }) => {
                tracing::info!(%scope, pages, items, "pagination complete");
            }
            HarvestEvent::Page(PageEvent::Aborted { scope, pages, reason }) => {
                tracing::error!(%scope, pages, %reason, "pagination aborted");
            }
        }
    }
}

/// Stores events in memory. Clones share storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryObserver {
    events: Arc<Mutex<Vec<HarvestEvent>>>,
}

impl MemoryObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything observed so far.
    pub fn events(&self) -> Vec<HarvestEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Retry events only, in order.
    pub fn retry_events(&self) -> Vec<RetryEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HarvestEvent::Retry(retry) => Some(retry),
                HarvestEvent::Page(_) => None,
            })
            .collect()
    }

    /// Page events only, in order.
    pub fn page_events(&self) -> Vec<PageEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HarvestEvent::Page(page) => Some(page),
                HarvestEvent::Retry(_) => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Observer for MemoryObserver {
    fn observe(&self, event: &HarvestEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}

/// Shared observer handle as stored by the policy and paginator.
pub type SharedObserver = Arc<dyn Observer>;
