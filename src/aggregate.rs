//! Shared plumbing for the dashboard aggregate fetchers.
//!
//! A fetcher issues a batch of independent list queries, waits for every one
//! of them to settle, and only then applies results. Each run is tied to an
//! [`Effect`] token; starting a new run or tearing the fetcher down cancels the
//! previous token so that late results are dropped instead of applied.

use std::future::Future;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::metric::MetricValue;
use crate::provider::{DataProvider, ListParams, ListResult, ProviderError};

/// Per-query outcome of a settled batch.
pub type Settled = Result<ListResult, ProviderError>;

/// A named query in a batch.
#[derive(Debug, Clone)]
pub struct Query {
    pub metric: &'static str,
    pub resource: &'static str,
    pub params: ListParams,
}

impl Query {
    pub fn new(metric: &'static str, resource: &'static str, params: ListParams) -> Self {
        Query { metric, resource, params }
    }

    /// A count-only query: first page, one row.
    pub fn count(metric: &'static str, resource: &'static str, params: ListParams) -> Self {
        Query::new(metric, resource, params.count_only())
    }
}

/// Run every query concurrently and wait for all of them, successful or not.
///
/// Results come back in query order. A failing query never short-circuits its
/// siblings.
pub async fn settle_all(provider: &dyn DataProvider, queries: Vec<Query>) -> Vec<Settled> {
    join_all(queries.into_iter().map(|q| async move { provider.list(q.resource, q.params).await }))
        .await
}

/// The server total of a settled count query, or unknown if it failed.
pub fn count_of(result: &Settled) -> MetricValue {
    match result {
        Ok(list) => MetricValue::Known(list.total),
        Err(_) => MetricValue::Unknown,
    }
}

/// Some, but not all, of `total` queries failed.
pub fn has_partial_failure(failed: usize, total: usize) -> bool {
    failed > 0 && failed < total
}

/// Cancellation scope of the current fetch.
#[derive(Debug, Default)]
pub struct Effect {
    current: Mutex<Option<CancellationToken>>,
}

impl Effect {
    /// Start a new run, cancelling the one before it.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.current.lock().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel the current run; nothing it produces will be applied.
    pub fn teardown(&self) {
        if let Some(token) = self.current.lock().take() {
            token.cancel();
        }
    }
}

/// Await `fut` unless `token` fires first.
pub async fn guarded<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Dataset, Fault, InMemoryProvider, Operation};
    use rstest::rstest;
    use serde_json::json;
    use std::time::Duration;

    #[rstest]
    #[case(0, 4, false)]
    #[case(1, 4, true)]
    #[case(3, 4, true)]
    #[case(4, 4, false)]
    #[case(0, 0, false)]
    fn partial_failure_is_strictly_between(#[case] failed: usize, #[case] total: usize, #[case] expected: bool) {
        assert_eq!(has_partial_failure(failed, total), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn one_failure_does_not_block_siblings() {
        let mut data = Dataset::default();
        for id in 1..=3 {
            data.insert("activities", json!({"id": id, "kind": "call"}));
        }
        data.insert("tasks", json!({"id": 1}));
        let provider = InMemoryProvider::new(data);
        provider.inject(Fault::fail(Operation::List, "tasks").after(Duration::from_secs(1)));
        provider.inject(Fault::slow(Operation::List, "activities", Duration::from_secs(3)));

        let results = settle_all(
            &provider,
            vec![
                Query::count("activities", "activities", ListParams::new()),
                Query::count("tasks", "tasks", ListParams::new()),
            ],
        )
        .await;
        assert_eq!(count_of(&results[0]), MetricValue::Known(3));
        assert_eq!(results[0].as_ref().map(|r| r.data.len()).ok(), Some(1));
        assert_eq!(count_of(&results[1]), MetricValue::Unknown);
    }

    #[tokio::test]
    async fn new_run_cancels_previous_and_teardown_cancels_current() {
        let effect = Effect::default();
        let first = effect.begin();
        let second = effect.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        effect.teardown();
        assert!(second.is_cancelled());
        assert_eq!(guarded(&second, async { 1 }).await, None);
    }
}
