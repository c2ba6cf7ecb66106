//! Convenient re-exports for common usage.
pub use crate::{
    Backoff, Cancellation, Classify, ErrorClass, Jitter, PageRequest, PageResponse,
    PaginationError, Paginator, PolicyRecord, PolicySearch, RetryPolicy, Scope,
};
