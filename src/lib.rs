#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # iam-harvest
//!
//! Collects every IAM policy binding visible to a cloud organization by walking a cursor-paginated
//! search endpoint, riding out rate limiting along the way.
//!
//! ## Pieces
//!
//! - [`RetryPolicy`]: one page fetch with jittered exponential backoff; only rate-limit failures
//!   are retried (5 attempts, `min(2^n + U[0,1), 60)` second waits by default)
//! - [`Paginator`]: follows cursors until the API reports no more pages, concatenating items in
//!   fetch order
//! - [`PolicySearch`]: the injected single-page transport; [`HttpPolicySearch`] talks to the
//!   Cloud Asset API
//! - [`telemetry`]: observers that receive every retry and page decision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use iam_harvest::{HttpPolicySearch, Paginator, RetryPolicy, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let search = HttpPolicySearch::new(std::env::var("ACCESS_TOKEN")?);
//!     let retry = RetryPolicy::builder().build()?;
//!     let paginator = Paginator::new(search, retry);
//!
//!     let scope: Scope = "123456789012".parse()?;
//!     let records = paginator.fetch_all(&scope).await?;
//!     println!("{} policies", records.len());
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod cancel;
#[cfg(feature = "cli")]
pub mod cli;
pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod jitter;
pub mod paginate;
pub mod prelude;
pub mod retry;
pub mod sleeper;
pub mod telemetry;
pub mod types;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use cancel::{CancelHandle, Cancellation};
pub use error::{BuildError, Classify, ErrorClass, PaginationError};
#[cfg(feature = "http")]
pub use http::{ApiVariant, HttpPolicySearch, SearchError};
pub use jitter::{FixedSource, Jitter, JitterSource, SeededSource, ThreadRngSource};
pub use paginate::{Paginator, PolicySearch};
pub use retry::{RetryPolicy, RetryPolicyBuilder, RetryStop};
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use telemetry::{HarvestEvent, LogObserver, MemoryObserver, NullObserver, Observer};
pub use types::{PageRequest, PageResponse, PolicyRecord, Scope, ScopeError};
