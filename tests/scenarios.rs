//! End-to-end dashboard scenarios against the in-memory provider.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use rstest::rstest;
use serde_json::json;

use crm_dashboard::cache::{Domain, QueryCache};
use crm_dashboard::dates::{to_wire, FixedClock};
use crm_dashboard::identity::StaticIdentity;
use crm_dashboard::kpi::KpiService;
use crm_dashboard::memory::{Dataset, Fault, InMemoryProvider, Operation};
use crm_dashboard::metric::MetricValue;
use crm_dashboard::mutation::MutationPhase;
use crm_dashboard::overlay::TaskPatch;
use crm_dashboard::staleness::StaleThresholds;
use crm_dashboard::task::TaskId;
use crm_dashboard::tasks::MyTasks;
use crm_dashboard::Error;

// Friday noon UTC.
fn now() -> DateTime<FixedOffset> {
    Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap().fixed_offset()
}

fn days_ago(days: i64) -> String {
    to_wire(now().with_timezone(&Utc) - Duration::days(days))
}

fn seeded() -> Dataset {
    let mut data = Dataset::default();
    for (stage, days) in [("new_lead", 8), ("initial_outreach", 15), ("feedback_logged", 22), ("demo_scheduled", 0)] {
        data.insert("opportunities", json!({"name": stage, "stage": stage, "last_activity_date": days_ago(days)}));
    }
    let tasks = [
        (1, "Call buyer", "2025-11-27T15:00:00Z", "high"),
        (2, "Send samples", "2025-11-28T15:00:00Z", "medium"),
        (3, "Prep demo", "2025-12-01T15:00:00Z", "low"),
        (4, "Quarterly review", "2025-12-20T15:00:00Z", "critical"),
    ];
    for (id, subject, due, priority) in tasks {
        data.insert("tasks", json!({"id": id, "sales_id": 1, "subject": subject, "due_date": due,
            "priority": priority, "type": "call", "completed": false, "deleted_at": null}));
    }
    data.insert("activities", json!({"activity_date": days_ago(1)}));
    data
}

struct Harness {
    provider: Arc<InMemoryProvider>,
    cache: Arc<QueryCache>,
    tasks: MyTasks,
}

async fn harness() -> Harness {
    let provider = Arc::new(InMemoryProvider::new(seeded()));
    let cache = Arc::new(QueryCache::new());
    let tasks = MyTasks::new(
        provider.clone(),
        Arc::new(StaticIdentity(Some(1))),
        cache.clone(),
        Arc::new(FixedClock(now())),
    );
    tasks.refetch().await.unwrap();
    Harness { provider, cache, tasks }
}

fn visible(tasks: &MyTasks) -> Vec<TaskId> {
    tasks.tasks().iter().map(|t| t.id).collect()
}

fn kpi(provider: &Arc<InMemoryProvider>) -> KpiService {
    KpiService::new(
        provider.clone(),
        Arc::new(StaticIdentity(Some(1))),
        Arc::new(FixedClock(now())),
        StaleThresholds::default(),
    )
}

#[tokio::test]
async fn stale_deals_follow_per_stage_thresholds() {
    let provider = Arc::new(InMemoryProvider::new(seeded()));
    let service = kpi(&provider);
    service.refetch().await;
    assert_eq!(service.snapshot().metrics.stale_deals, MetricValue::Known(3));
}

#[tokio::test(start_paused = true)]
async fn delayed_complete_hides_at_once_and_restores_on_rejection() {
    let h = harness().await;
    let original = h.tasks.tasks().into_iter().find(|t| t.id == 2).unwrap();
    h.provider
        .inject(Fault::fail(Operation::Update, "tasks").for_id(2).after(StdDuration::from_secs(3)));

    let complete = h.tasks.complete_task(2);
    tokio::pin!(complete);
    assert!(futures::poll!(&mut complete).is_pending());
    assert_eq!(visible(&h.tasks), vec![1, 3, 4]);

    let err = complete.await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
    let restored = h.tasks.tasks().into_iter().find(|t| t.id == 2).unwrap();
    assert_eq!(restored, original);
    assert_eq!(visible(&h.tasks), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn rapid_completes_resolving_out_of_order_all_stay_hidden() {
    let h = harness().await;
    for (id, secs) in [(1, 3), (2, 1), (3, 2)] {
        h.provider
            .inject(Fault::slow(Operation::Update, "tasks", StdDuration::from_secs(secs)).for_id(id));
    }

    // A refetch lands while all three are in flight and still sees them open.
    let (a, b, c, read) = tokio::join!(
        h.tasks.complete_task(1),
        h.tasks.complete_task(2),
        h.tasks.complete_task(3),
        h.tasks.refetch(),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    read.unwrap();
    assert_eq!(visible(&h.tasks), vec![4]);

    for id in [1, 2, 3] {
        assert_eq!(h.tasks.phase(id), MutationPhase::Settled);
        assert_eq!(h.provider.dataset().get("tasks", id).unwrap()["completed"], json!(true));
    }

    assert!(h.tasks.refresh_if_stale().await.unwrap());
    assert_eq!(visible(&h.tasks), vec![4]);
    assert!(h.tasks.overlay().is_empty());
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Complete,
    Snooze,
    Delete,
    Reschedule,
}

async fn run(tasks: &MyTasks, id: TaskId, action: Action) -> crm_dashboard::Result<()> {
    match action {
        Action::Complete => tasks.complete_task(id).await,
        Action::Snooze => tasks.snooze_task(id).await,
        Action::Delete => tasks.delete_task(id).await,
        Action::Reschedule => tasks.reschedule_task(id, now().with_timezone(&Utc) + Duration::days(30)).await,
    }
}

#[rstest]
#[case::complete(Action::Complete, Operation::Update)]
#[case::snooze(Action::Snooze, Operation::Update)]
#[case::delete(Action::Delete, Operation::Delete)]
#[case::reschedule(Action::Reschedule, Operation::Update)]
#[tokio::test]
async fn rejected_mutation_restores_overlay_exactly(#[case] action: Action, #[case] op: Operation) {
    let h = harness().await;
    h.tasks.update_task_locally(4, TaskPatch { subject: Some("Edited locally".into()), ..TaskPatch::default() });
    h.tasks.update_task_locally(3, TaskPatch::pending_completion());
    let overlay_before = h.tasks.overlay();
    let view_before = h.tasks.tasks();
    h.provider.inject(Fault::fail(op, "tasks"));

    assert!(run(&h.tasks, 4, action).await.is_err());
    assert_eq!(h.tasks.overlay(), overlay_before);
    assert_eq!(h.tasks.tasks(), view_before);
    for domain in Domain::ALL {
        assert_eq!(h.cache.generation(domain), 1, "{action:?} did not invalidate {domain:?}");
    }
}

#[rstest]
#[case::complete(Action::Complete)]
#[case::snooze(Action::Snooze)]
#[case::delete(Action::Delete)]
#[case::reschedule(Action::Reschedule)]
#[tokio::test]
async fn unknown_task_is_rejected_before_any_request(#[case] action: Action) {
    let h = harness().await;
    let calls = h.provider.calls().len();
    let err = run(&h.tasks, 404, action).await.unwrap_err();
    assert_eq!(err.to_string(), "Task 404 not found");
    assert_eq!(h.provider.calls().len(), calls);
    assert_eq!(h.cache.generation(Domain::Tasks), 0);
}

#[tokio::test]
async fn hidden_task_counts_as_missing() {
    let h = harness().await;
    h.tasks.complete_task(1).await.unwrap();
    assert!(matches!(h.tasks.snooze_task(1).await, Err(Error::TaskNotFound(1))));
}

/// Faults that knock out the first `k` headline KPI queries.
fn fail_headline(provider: &InMemoryProvider, k: usize) {
    let faults = [
        Fault::fail(Operation::List, "tasks").when_filter_has("due_date@lt"),
        Fault::fail(Operation::List, "opportunities").when_filter_has("$or"),
        Fault::fail(Operation::List, "activities").when_filter_has("activity_date@lte"),
        Fault::fail(Operation::List, "opportunities"),
    ];
    for fault in faults.into_iter().take(k) {
        provider.inject(fault);
    }
}

#[rstest]
#[case(0, false)]
#[case(1, true)]
#[case(2, true)]
#[case(3, true)]
#[case(4, false)]
#[tokio::test]
async fn partial_failure_flag_only_between_none_and_all(#[case] k: usize, #[case] partial: bool) {
    let provider = Arc::new(InMemoryProvider::new(seeded()));
    fail_headline(&provider, k);
    let service = kpi(&provider);
    service.refetch().await;

    let snap = service.snapshot();
    let m = snap.metrics;
    let headline = [m.overdue_tasks, m.stale_deals, m.activities_this_week, m.open_opportunities];
    let unknown = headline.iter().filter(|v| v.is_unknown()).count();
    assert_eq!(unknown, k);
    assert_eq!(snap.has_partial_failure, partial);
    assert_eq!(snap.error_message.is_some(), k > 0);
    if k < 4 {
        assert_eq!(m.open_opportunities, MetricValue::Known(4));
    }
    if k == 0 {
        assert_eq!(m.overdue_tasks, MetricValue::Known(1));
        assert_eq!(m.activities_this_week, MetricValue::Known(1));
    }
}
