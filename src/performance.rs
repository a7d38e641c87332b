//! "My performance" week-over-week metrics for the current sales rep.
//!
//! Eight queries: this week and last week for activities logged, tasks
//! completed and deals moved, plus currently owned open opportunities and last
//! week's dashboard snapshot for comparison. A failed query leaves its metric
//! unknown instead of reading as zero.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::aggregate::{count_of, guarded, has_partial_failure, settle_all, Effect, Query, Settled};
use crate::dates::{to_wire, Clock, WeekBoundaries};
use crate::identity::IdentityService;
use crate::kpi::closed_stages;
use crate::metric::{Metric, MetricValue};
use crate::provider::{DataProvider, ListParams, SortOrder};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PerformanceMetrics {
    pub activities_this_week: Metric,
    pub tasks_completed: Metric,
    pub deals_moved: Metric,
    pub open_opportunities: Metric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PerformanceSnapshot {
    pub metrics: PerformanceMetrics,
    pub loading: bool,
    pub error: Option<String>,
    /// Names of the queries that failed in the last run.
    pub failed: Vec<&'static str>,
    /// Some queries failed but not all of them.
    pub has_partial_failure: bool,
}

impl Default for PerformanceSnapshot {
    fn default() -> Self {
        PerformanceSnapshot {
            metrics: PerformanceMetrics::default(),
            loading: true,
            error: None,
            failed: Vec::new(),
            has_partial_failure: false,
        }
    }
}

/// `[gte, lte]` bounds on `field` as filter entries.
fn within(params: ListParams, field: &str, start: &str, end: &str) -> ListParams {
    params.filter(format!("{field}@gte"), start).filter(format!("{field}@lte"), end)
}

pub struct PerformanceService {
    provider: Arc<dyn DataProvider>,
    identity: Arc<dyn IdentityService>,
    clock: Arc<dyn Clock>,
    effect: Effect,
    state: Mutex<PerformanceSnapshot>,
}

impl PerformanceService {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        identity: Arc<dyn IdentityService>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        PerformanceService {
            provider,
            identity,
            clock,
            effect: Effect::default(),
            state: Mutex::new(PerformanceSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        self.state.lock().clone()
    }

    pub fn teardown(&self) {
        self.effect.teardown();
    }

    pub async fn refetch(&self) {
        let token = self.effect.begin();
        self.state.lock().loading = true;

        let sales_id = match guarded(&token, self.identity.current_sales_id()).await {
            None => return,
            Some(Ok(Some(id))) => id,
            Some(Ok(None)) => {
                if !token.is_cancelled() {
                    *self.state.lock() = PerformanceSnapshot { loading: false, ..Default::default() };
                }
                return;
            }
            Some(Err(e)) => {
                error!(feature = "performance", error = %e, "failed to resolve current sales id");
                if !token.is_cancelled() {
                    let mut st = self.state.lock();
                    st.error = Some(e.to_string());
                    st.loading = false;
                }
                return;
            }
        };

        let now = self.clock.now();
        let weeks = WeekBoundaries::at(now);
        let queries = queries(sales_id, &weeks, &now.timezone());
        let names: Vec<&'static str> = queries.iter().map(|q| q.metric).collect();

        let Some(results) = guarded(&token, settle_all(self.provider.as_ref(), queries)).await else {
            debug!(feature = "performance", "discarding results of a superseded run");
            return;
        };

        let failed: Vec<&'static str> = names
            .iter()
            .zip(&results)
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (*name, e)))
            .map(|(name, e)| {
                error!(feature = "performance", metric = name, error = %e, "performance query failed");
                name
            })
            .collect();
        let metrics = evaluate(&results);
        let partial = has_partial_failure(failed.len(), results.len());

        let mut st = self.state.lock();
        if token.is_cancelled() {
            return;
        }
        *st = PerformanceSnapshot { metrics, loading: false, error: None, failed, has_partial_failure: partial };
    }
}

fn queries(sales_id: i64, weeks: &WeekBoundaries, tz: &chrono::FixedOffset) -> Vec<Query> {
    let this_start = to_wire(weeks.this_week_start);
    let this_end = to_wire(weeks.this_week_end);
    let last_start = to_wire(weeks.last_week_start);
    let last_end = to_wire(weeks.last_week_end);

    let activities = || ListParams::new().filter("created_by", sales_id);
    let completed = || ListParams::new().filter("sales_id", sales_id).filter("completed", true);
    let moves = || {
        ListParams::new()
            .filter("changed_by", sales_id)
            .filter("from_stage@neq", Value::Null)
            .sort("audit_id", SortOrder::Asc)
    };

    vec![
        Query::count("activities", "activities", within(activities(), "activity_date", &this_start, &this_end)),
        Query::count("tasks_completed", "tasks", within(completed(), "completed_at", &this_start, &this_end)),
        Query::count("deals_moved", "opportunity_stage_changes", within(moves(), "changed_at", &this_start, &this_end)),
        Query::count(
            "open_opportunities",
            "opportunities",
            ListParams::new()
                .filter("$or", json!([{ "opportunity_owner_id": sales_id }, { "account_manager_id": sales_id }]))
                .filter("stage@not_in", closed_stages()),
        ),
        Query::count("activities_last_week", "activities", within(activities(), "activity_date", &last_start, &last_end)),
        Query::count("tasks_completed_last_week", "tasks", within(completed(), "completed_at", &last_start, &last_end)),
        Query::count("deals_moved_last_week", "opportunity_stage_changes", within(moves(), "changed_at", &last_start, &last_end)),
        Query::count(
            "open_opportunities_snapshot",
            "dashboard_snapshots",
            ListParams::new()
                .filter("sales_id", sales_id)
                .filter("snapshot_date", weeks.last_week_end_date(tz).to_string())
                .sort("id", SortOrder::Desc),
        ),
    ]
}

/// Last week's open opportunity count from the snapshot row, if there is one.
fn snapshot_count(result: &Settled) -> Option<u64> {
    result.as_ref().ok()?.data.first()?.get("open_opportunities_count")?.as_u64()
}

fn evaluate(results: &[Settled]) -> PerformanceMetrics {
    let [activities, tasks, moves, open, activities_prev, tasks_prev, moves_prev, snapshot] = results else {
        error!(feature = "performance", count = results.len(), "unexpected performance batch size");
        return PerformanceMetrics::default();
    };
    let open_now = count_of(open);
    // No snapshot for last week: compare against the current count.
    let open_prev = snapshot_count(snapshot).map_or(open_now, MetricValue::Known);
    PerformanceMetrics {
        activities_this_week: Metric::compared(count_of(activities), count_of(activities_prev)),
        tasks_completed: Metric::compared(count_of(tasks), count_of(tasks_prev)),
        deals_moved: Metric::compared(count_of(moves), count_of(moves_prev)),
        open_opportunities: Metric::compared(open_now, open_prev),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::FixedClock;
    use crate::fields::TrendDirection;
    use crate::identity::StaticIdentity;
    use crate::memory::{Dataset, Fault, InMemoryProvider, Operation};
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};

    // Wednesday; last week ends Sunday 2025-11-23.
    fn now() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2025, 11, 26, 12, 0, 0).unwrap().fixed_offset()
    }

    fn dataset(with_snapshot: bool) -> Dataset {
        let mut data = Dataset::default();
        for date in ["2025-11-24T09:00:00Z", "2025-11-25T09:00:00Z", "2025-11-18T09:00:00Z"] {
            data.insert("activities", json!({"created_by": 1, "activity_date": date}));
        }
        data.insert("activities", json!({"created_by": 2, "activity_date": "2025-11-25T09:00:00Z"}));
        data.insert("tasks", json!({"sales_id": 1, "completed": true, "completed_at": "2025-11-20T09:00:00Z"}));
        data.insert("tasks", json!({"sales_id": 1, "completed": true, "completed_at": "2025-11-21T09:00:00Z"}));
        data.insert("tasks", json!({"sales_id": 1, "completed": true, "completed_at": "2025-11-25T09:00:00Z"}));
        data.insert("opportunity_stage_changes", json!({"id": 1, "audit_id": 1, "changed_by": 1,
            "from_stage": null, "changed_at": "2025-11-25T09:00:00Z"}));
        data.insert("opportunity_stage_changes", json!({"id": 2, "audit_id": 2, "changed_by": 1,
            "from_stage": "new_lead", "changed_at": "2025-11-25T10:00:00Z"}));
        data.insert("opportunities", json!({"opportunity_owner_id": 1, "stage": "new_lead"}));
        data.insert("opportunities", json!({"account_manager_id": 1, "stage": "demo_scheduled"}));
        data.insert("opportunities", json!({"opportunity_owner_id": 1, "stage": "closed_lost"}));
        if with_snapshot {
            data.insert("dashboard_snapshots", json!({"sales_id": 1, "snapshot_date": "2025-11-23",
                "open_opportunities_count": 4}));
        }
        data
    }

    async fn run(provider: Arc<InMemoryProvider>) -> PerformanceSnapshot {
        let svc = PerformanceService::new(provider, Arc::new(StaticIdentity(Some(1))), Arc::new(FixedClock(now())));
        svc.refetch().await;
        svc.snapshot()
    }

    #[tokio::test]
    async fn week_over_week_metrics() {
        let snap = run(Arc::new(InMemoryProvider::new(dataset(true)))).await;
        let m = snap.metrics;
        assert_eq!(m.activities_this_week.value, MetricValue::Known(2));
        assert_eq!(m.activities_this_week.trend.unwrap().percent, 100);
        assert_eq!(m.tasks_completed.value, MetricValue::Known(1));
        assert_eq!(m.tasks_completed.trend.unwrap().direction, TrendDirection::Down);
        assert_eq!(m.deals_moved.value, MetricValue::Known(1));
        assert_eq!(m.open_opportunities.value, MetricValue::Known(2));
        assert_eq!(m.open_opportunities.trend.unwrap().previous, 4);
        assert!(snap.failed.is_empty());
        assert!(!snap.has_partial_failure);
    }

    #[tokio::test]
    async fn missing_snapshot_compares_against_current() {
        let snap = run(Arc::new(InMemoryProvider::new(dataset(false)))).await;
        let trend = snap.metrics.open_opportunities.trend.unwrap();
        assert_eq!((trend.previous, trend.percent), (2, 0));
        assert_eq!(trend.direction, TrendDirection::Flat);
    }

    #[tokio::test]
    async fn failed_query_is_unknown_not_zero() {
        let provider = Arc::new(InMemoryProvider::new(dataset(true)));
        provider.inject(Fault::fail(Operation::List, "opportunity_stage_changes"));
        let snap = run(provider).await;
        assert_eq!(snap.metrics.deals_moved, Metric::unknown());
        assert_eq!(snap.metrics.activities_this_week.value, MetricValue::Known(2));
        assert_eq!(snap.failed, vec!["deals_moved", "deals_moved_last_week"]);
        assert!(snap.has_partial_failure);
    }

    #[tokio::test]
    async fn total_failure_is_not_partial() {
        let provider = Arc::new(InMemoryProvider::new(dataset(true)));
        for resource in ["activities", "tasks", "opportunity_stage_changes", "opportunities", "dashboard_snapshots"] {
            provider.inject(Fault::fail(Operation::List, resource));
        }
        let snap = run(provider).await;
        assert_eq!(snap.failed.len(), 8);
        assert!(!snap.has_partial_failure);
        assert_eq!(snap.metrics.open_opportunities, Metric::unknown());
        assert!(!snap.loading);
    }
}
