//! Dashboard KPI header metrics.
//!
//! Six queries run in parallel: open opportunities, stale-deal candidates,
//! overdue tasks, activities this week, activities last week (trend only) and
//! activities within the recent window. The first four are headline metrics;
//! partial failure and the combined error message are computed over those.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::aggregate::{count_of, guarded, has_partial_failure, settle_all, Effect, Query, Settled};
use crate::dates::{to_wire, Clock, WeekBoundaries};
use crate::fields::CLOSED_STAGES;
use crate::identity::IdentityService;
use crate::metric::MetricValue;
use crate::provider::{DataProvider, ListParams, ListResult};
use crate::staleness::{count_stale, OpportunityActivity, StaleThresholds};
use crate::trend::{calculate_trend, Trend};

/// Upper bound on stale-deal candidates pulled for client-side evaluation.
pub const STALE_CANDIDATE_LIMIT: u32 = 500;
pub const DEFAULT_RECENT_WINDOW_MINUTES: i64 = 60;
const HEADLINE_METRICS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KpiMetrics {
    pub open_opportunities: MetricValue,
    pub overdue_tasks: MetricValue,
    pub activities_this_week: MetricValue,
    pub stale_deals: MetricValue,
    pub recent_activity: MetricValue,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KpiTrends {
    pub activities_this_week: Option<Trend>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KpiSnapshot {
    pub metrics: KpiMetrics,
    pub trends: KpiTrends,
    pub loading: bool,
    /// Identity resolution failed; nothing was queried.
    pub error: Option<String>,
    /// Failing headline metrics, joined with `"; "`.
    pub error_message: Option<String>,
    pub has_partial_failure: bool,
}

impl Default for KpiSnapshot {
    fn default() -> Self {
        KpiSnapshot {
            metrics: KpiMetrics::default(),
            trends: KpiTrends::default(),
            loading: true,
            error: None,
            error_message: None,
            has_partial_failure: false,
        }
    }
}

pub fn closed_stages() -> Value {
    Value::from(CLOSED_STAGES.iter().map(|s| s.as_str()).collect::<Vec<_>>())
}

pub struct KpiService {
    provider: Arc<dyn DataProvider>,
    identity: Arc<dyn IdentityService>,
    clock: Arc<dyn Clock>,
    thresholds: StaleThresholds,
    recent_window: Duration,
    effect: Effect,
    state: Mutex<KpiSnapshot>,
}

impl KpiService {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        identity: Arc<dyn IdentityService>,
        clock: Arc<dyn Clock>,
        thresholds: StaleThresholds,
    ) -> Self {
        KpiService {
            provider,
            identity,
            clock,
            thresholds,
            recent_window: Duration::minutes(DEFAULT_RECENT_WINDOW_MINUTES),
            effect: Effect::default(),
            state: Mutex::new(KpiSnapshot::default()),
        }
    }

    pub fn with_recent_window(mut self, window: Duration) -> Self {
        self.recent_window = window;
        self
    }

    pub fn snapshot(&self) -> KpiSnapshot {
        self.state.lock().clone()
    }

    /// Stop applying results of the run in progress.
    pub fn teardown(&self) {
        self.effect.teardown();
    }

    /// Recompute every metric. Failures are recorded in the snapshot, never returned.
    pub async fn refetch(&self) {
        let token = self.effect.begin();
        self.state.lock().loading = true;

        let sales_id = match guarded(&token, self.identity.current_sales_id()).await {
            None => return,
            Some(Ok(Some(id))) => id,
            Some(Ok(None)) => {
                if !token.is_cancelled() {
                    *self.state.lock() = KpiSnapshot { loading: false, ..KpiSnapshot::default() };
                }
                return;
            }
            Some(Err(e)) => {
                error!(feature = "kpi", error = %e, "failed to resolve current sales id");
                if !token.is_cancelled() {
                    let mut st = self.state.lock();
                    st.error = Some(e.to_string());
                    st.loading = false;
                }
                return;
            }
        };

        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);
        let weeks = WeekBoundaries::at(now);
        let queries = self.queries(sales_id, &weeks, now_utc);

        let Some(results) = guarded(&token, settle_all(self.provider.as_ref(), queries)).await else {
            debug!(feature = "kpi", "discarding KPI results of a superseded run");
            return;
        };
        let snapshot = self.evaluate(&results, now_utc);

        let mut st = self.state.lock();
        if token.is_cancelled() {
            debug!(feature = "kpi", "discarding KPI results of a superseded run");
            return;
        }
        *st = snapshot;
    }

    fn queries(&self, sales_id: i64, weeks: &WeekBoundaries, now: chrono::DateTime<Utc>) -> Vec<Query> {
        // Windows reaching past the representable range match everything.
        let stale_cutoff = Duration::try_days(self.thresholds.min_days())
            .and_then(|d| now.checked_sub_signed(d))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let recent_cutoff = now.checked_sub_signed(self.recent_window).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        vec![
            Query::count(
                "Open opportunities",
                "opportunities",
                ListParams::new().filter("stage@not_in", closed_stages()),
            ),
            Query::new(
                "Stale opportunities",
                "opportunities",
                ListParams::new()
                    .filter("stage@not_in", closed_stages())
                    .filter(
                        "$or",
                        json!([
                            { "last_activity_date@lt": to_wire(stale_cutoff) },
                            { "last_activity_date@is": null },
                        ]),
                    )
                    .page(1, STALE_CANDIDATE_LIMIT),
            ),
            Query::count(
                "Overdue tasks",
                "tasks",
                ListParams::new()
                    .filter("sales_id", sales_id)
                    .filter("completed", false)
                    .filter("due_date@lt", to_wire(weeks.today)),
            ),
            Query::count(
                "Activities",
                "activities",
                ListParams::new()
                    .filter("activity_date@gte", to_wire(weeks.this_week_start))
                    .filter("activity_date@lte", to_wire(weeks.this_week_end)),
            ),
            Query::count(
                "Activities last week",
                "activities",
                ListParams::new()
                    .filter("activity_date@gte", to_wire(weeks.last_week_start))
                    .filter("activity_date@lte", to_wire(weeks.last_week_end)),
            ),
            Query::count(
                "Recent activity",
                "activities",
                ListParams::new().filter("activity_date@gte", to_wire(recent_cutoff)),
            ),
        ]
    }

    fn evaluate(&self, results: &[Settled], now: chrono::DateTime<Utc>) -> KpiSnapshot {
        let [open, stale, overdue, this_week, last_week, recent] = results else {
            error!(feature = "kpi", count = results.len(), "unexpected KPI batch size");
            return KpiSnapshot { loading: false, ..KpiSnapshot::default() };
        };

        let stale_deals = match stale {
            Ok(list) => {
                let candidates: Vec<OpportunityActivity> = list
                    .data
                    .iter()
                    .filter_map(|row| match serde_json::from_value(row.clone()) {
                        Ok(opp) => Some(opp),
                        Err(e) => {
                            warn!(feature = "kpi", error = %e, "skipping malformed opportunity row");
                            None
                        }
                    })
                    .collect();
                if is_truncated(list) {
                    warn!(
                        feature = "kpi",
                        total = list.total,
                        fetched = list.data.len(),
                        "stale deal count covers only the first page of candidates"
                    );
                }
                MetricValue::Known(count_stale(&candidates, now, &self.thresholds) as u64)
            }
            Err(_) => MetricValue::Unknown,
        };

        let headline = [
            ("Open opportunities", open),
            ("Stale opportunities", stale),
            ("Overdue tasks", overdue),
            ("Activities", this_week),
        ];
        let errors: Vec<String> = headline
            .iter()
            .filter_map(|(name, result)| result.as_ref().err().map(|e| (name, e)))
            .map(|(name, e)| {
                error!(feature = "kpi", metric = *name, error = %e, "KPI query failed");
                format!("{name}: {e}")
            })
            .collect();
        if let Err(e) = recent {
            error!(feature = "kpi", metric = "Recent activity", error = %e, "KPI query failed");
        }

        let activities_this_week = count_of(this_week);
        let trend = match (activities_this_week, last_week) {
            (MetricValue::Known(current), Ok(previous)) => Some(calculate_trend(current, previous.total)),
            (_, Err(e)) => {
                error!(feature = "kpi", metric = "Activities last week", error = %e, "trend query failed");
                None
            }
            _ => None,
        };

        KpiSnapshot {
            metrics: KpiMetrics {
                open_opportunities: count_of(open),
                overdue_tasks: count_of(overdue),
                activities_this_week,
                stale_deals,
                recent_activity: count_of(recent),
            },
            trends: KpiTrends { activities_this_week: trend },
            loading: false,
            error: None,
            has_partial_failure: has_partial_failure(errors.len(), HEADLINE_METRICS),
            error_message: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

/// The server holds more rows than the page brought back.
fn is_truncated(list: &ListResult) -> bool {
    list.total > list.data.len() as u64
}
