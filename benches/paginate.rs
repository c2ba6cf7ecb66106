use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use iam_harvest::{
    Classify, ErrorClass, FixedSource, InstantSleeper, NullObserver, PageRequest, PageResponse,
    Paginator, PolicyRecord, PolicySearch, RetryPolicy, Scope,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
#[error("rate limited")]
struct Limited;

impl Classify for Limited {
    fn class(&self) -> ErrorClass {
        ErrorClass::TransientRateLimit
    }
}

// Serves `pages` pages of `per_page` records; every other request is rate limited first.
struct InMemorySearch {
    pages: usize,
    per_page: usize,
    calls: AtomicUsize,
    flaky: bool,
}

#[async_trait]
impl PolicySearch for InMemorySearch {
    type Error = Limited;

    async fn search_policies(&self, request: &PageRequest) -> Result<PageResponse, Limited> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if self.flaky && call % 2 == 0 {
            return Err(Limited);
        }
        let index: usize = request.cursor.as_deref().map_or(0, |c| c.parse().unwrap_or(0));
        let items = (0..self.per_page)
            .map(|i| PolicyRecord::new(json!({ "resource": format!("r{index}-{i}") })))
            .collect();
        let next = (index + 1 < self.pages).then(|| (index + 1).to_string());
        Ok(PageResponse::new(items, next))
    }
}

fn retry() -> RetryPolicy<Limited> {
    RetryPolicy::builder()
        .with_sleeper(InstantSleeper)
        .with_jitter_source(FixedSource::new(0.0))
        .with_observer(NullObserver)
        .build()
        .unwrap()
}

fn fetch_all_pages(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let scope = Scope::organization(123_456_789_012);
    let mut group = c.benchmark_group("fetch_all");

    for (pages, flaky) in [(1, false), (50, false), (50, true)] {
        let label = if flaky { "flaky" } else { "clean" };
        group.bench_with_input(BenchmarkId::new(label, pages), &pages, |b, &pages| {
            b.to_async(&rt).iter(|| async {
                let search =
                    Arc::new(InMemorySearch { pages, per_page: 100, calls: AtomicUsize::new(0), flaky });
                let paginator = Paginator::new(search, retry()).with_observer(NullObserver);
                let records = paginator.fetch_all(black_box(&scope)).await.unwrap();
                black_box(records.len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, fetch_all_pages);
criterion_main!(benches);
