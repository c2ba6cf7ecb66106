//! Cursor-driven aggregation of every page for one scope.
//!
//! The paginator issues one request at a time, feeds each through the retry policy, appends the
//! page's items in API order, and follows `next_cursor` until it is absent or empty. Any error
//! that survives the retry policy aborts the whole run; records gathered so far are dropped.

use crate::cancel::Cancellation;
use crate::error::{Classify, PaginationError};
use crate::retry::{RetryPolicy, RetryStop};
use crate::telemetry::{HarvestEvent, LogObserver, Observer, PageEvent, SharedObserver};
use crate::types::{PageRequest, PageResponse, PolicyRecord, Scope};
use async_trait::async_trait;
use std::sync::Arc;

/// Single-page search operation exposed by a transport.
///
/// Implementations classify their own failures through [`Classify`].
#[async_trait]
pub trait PolicySearch: Send + Sync {
    type Error: std::error::Error + Classify + Send + Sync + 'static;

    async fn search_policies(&self, request: &PageRequest) -> Result<PageResponse, Self::Error>;
}

#[async_trait]
impl<S> PolicySearch for Arc<S>
where
    S: PolicySearch + ?Sized,
{
    type Error = S::Error;

    async fn search_policies(&self, request: &PageRequest) -> Result<PageResponse, Self::Error> {
        (**self).search_policies(request).await
    }
}

/// Walks every page of a search for one scope.
pub struct Paginator<S: PolicySearch> {
    search: S,
    retry: RetryPolicy<S::Error>,
    observer: SharedObserver,
    cancel: Cancellation,
}

impl<S> std::fmt::Debug for Paginator<S>
where
    S: PolicySearch + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("search", &self.search)
            .field("retry", &self.retry)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<S> Paginator<S>
where
    S: PolicySearch,
{
    pub fn new(search: S, retry: RetryPolicy<S::Error>) -> Self {
        Self { search, retry, observer: Arc::new(LogObserver), cancel: Cancellation::never() }
    }

    /// Observer for page events. Retry events go to the policy's own observer.
    pub fn with_observer<O>(mut self, observer: O) -> Self
    where
        O: Observer + 'static,
    {
        self.observer = Arc::new(observer);
        self
    }

    pub fn with_shared_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Honored before every page request and during backoff waits. An error that ends a page on
    /// its own (permanent or out of attempts) is still reported as a fetch failure.
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn search(&self) -> &S {
        &self.search
    }

    /// Fetch every page for `scope` and return the items in fetch order.
    pub async fn fetch_all(
        &self,
        scope: &Scope,
    ) -> Result<Vec<PolicyRecord>, PaginationError<S::Error>> {
        let mut records = Vec::new();
        let mut request = PageRequest::first(scope.clone());
        let mut pages = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(scope, pages));
            }

            let response = self
                .retry
                .execute_until_cancelled(|| self.search.search_policies(&request), &self.cancel)
                .await;

            let PageResponse { items, next_cursor } = match response {
                Ok(page) => page,
                Err(RetryStop::Interrupted(_)) => {
                    return Err(self.cancelled(scope, pages));
                }
                Err(RetryStop::Failed(source)) => {
                    self.emit(PageEvent::Aborted {
                        scope: scope.to_string(),
                        pages,
                        reason: source.to_string(),
                    });
                    return Err(PaginationError::Fetch {
                        scope: scope.to_string(),
                        pages_fetched: pages,
                        source,
                    });
                }
            };

            pages += 1;
            let item_count = items.len();
            records.extend(items);
            let next = next_cursor.filter(|c| !c.is_empty());

            self.emit(PageEvent::Fetched {
                scope: scope.to_string(),
                page: pages,
                items: item_count,
                has_more: next.is_some(),
            });

            match next {
                Some(next) => request = PageRequest::next(scope.clone(), next),
                None => {
                    self.emit(PageEvent::Completed {
                        scope: scope.to_string(),
                        pages,
                        items: records.len(),
                    });
                    return Ok(records);
                }
            }
        }
    }

    fn cancelled(&self, scope: &Scope, pages: usize) -> PaginationError<S::Error> {
        self.emit(PageEvent::Aborted {
            scope: scope.to_string(),
            pages,
            reason: "cancelled".to_string(),
        });
        PaginationError::Cancelled { scope: scope.to_string(), pages_fetched: pages }
    }

    fn emit(&self, event: PageEvent) {
        self.observer.observe(&HarvestEvent::Page(event));
    }
}
