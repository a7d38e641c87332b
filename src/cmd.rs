//! Command implementations for the CLI interface.
//!
//! Each `cmd_*` handler builds the service it needs on top of the shared
//! [`App`] context, runs it once and prints the result. Handlers report
//! failures on stderr and exit non-zero; the library never does.

use std::process;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use clap::Subcommand;
use clap_complete::{generate, Shell};
use serde::Serialize;
use serde_json::Value;

use crate::cache::QueryCache;
use crate::config::Config;
use crate::dates::{format_due_relative, parse_due_input, start_of_day, Clock, SystemClock};
use crate::error::{Error, Result};
use crate::fields::*;
use crate::identity::{CachedIdentity, DirectIdentity, IdentityService};
use crate::kpi::{closed_stages, KpiService, STALE_CANDIDATE_LIMIT};
use crate::memory::InMemoryProvider;
use crate::metric::{Metric, MetricValue};
use crate::performance::PerformanceService;
use crate::pipeline::PipelineService;
use crate::provider::{DataProvider, ListParams, SortOrder};
use crate::recent::{JsonFileStorage, RecentItem, RecentItems};
use crate::staleness::{days_since_activity, OpportunityActivity, StaleThresholds};
use crate::task::{Task, TaskId};
use crate::tasks::MyTasks;

#[derive(Subcommand)]
pub enum Commands {
    /// List my open tasks grouped by due bucket.
    Tasks {
        /// Only show one bucket: overdue | today | tomorrow | upcoming | later.
        #[arg(long, value_enum)]
        status: Option<TaskStatus>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Mark a task complete.
    Complete { id: TaskId },

    /// Hide a task until the end of tomorrow.
    Snooze { id: TaskId },

    /// Delete a task.
    Delete { id: TaskId },

    /// Move a task to a new due date.
    Reschedule {
        id: TaskId,
        /// Due date: YYYY-MM-DD, "today", "tomorrow", "friday", "next monday", "in Nd".
        due: String,
    },

    /// Dashboard KPI header.
    Kpi {
        /// Window for the recent-activity count, in minutes.
        #[arg(long)]
        recent_minutes: Option<i64>,
        #[arg(long)]
        json: bool,
    },

    /// My week-over-week performance.
    Performance {
        #[arg(long)]
        json: bool,
    },

    /// Principal pipeline, largest first.
    Pipeline {
        /// Only principals assigned to me.
        #[arg(long)]
        mine: bool,
        #[arg(long)]
        json: bool,
    },

    /// Open opportunities past their stage's inactivity threshold.
    Stale {
        #[arg(long)]
        json: bool,
    },

    /// Recently viewed records.
    Recent {
        #[command(subcommand)]
        action: Option<RecentAction>,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type: bash | zsh | fish | powershell | elvish.
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum RecentAction {
    /// Show the list (default).
    List,
    /// Record a view of a record.
    Add {
        resource: String,
        id: i64,
        /// Display label; defaults to "<resource> #<id>".
        #[arg(long)]
        label: Option<String>,
    },
    /// Forget every entry.
    Clear,
}

/// Everything a command needs, opened once per invocation.
pub struct App {
    pub config: Config,
    pub provider: Arc<InMemoryProvider>,
    pub identity: Arc<dyn IdentityService>,
    pub cache: Arc<QueryCache>,
    pub clock: Arc<dyn Clock>,
    pub thresholds: StaleThresholds,
}

impl App {
    pub fn open(config: Config) -> Result<App> {
        let provider = Arc::new(InMemoryProvider::load(&config.db_path)?);
        let thresholds = provider.with_dataset(|d| d.thresholds);
        let direct = Arc::new(DirectIdentity::new(provider.clone(), config.user.clone()));
        Ok(App {
            identity: Arc::new(CachedIdentity::new(direct)),
            cache: Arc::new(QueryCache::new()),
            clock: Arc::new(SystemClock),
            thresholds,
            provider,
            config,
        })
    }

    pub fn save(&self) -> Result<()> {
        self.provider.save(&self.config.db_path)?;
        Ok(())
    }

    pub fn my_tasks(&self) -> MyTasks {
        MyTasks::new(self.provider.clone(), self.identity.clone(), self.cache.clone(), self.clock.clone())
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }
}

/// Unwrap or print `context: error` and exit 1.
pub fn or_exit<T>(res: Result<T>, context: &str) -> T {
    match res {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{context}: {e}");
            process::exit(1);
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("Failed to encode JSON: {e}");
            process::exit(1);
        }
    }
}

const BUCKETS: [TaskStatus; 5] = [
    TaskStatus::Overdue,
    TaskStatus::Today,
    TaskStatus::Tomorrow,
    TaskStatus::Upcoming,
    TaskStatus::Later,
];

/// Tasks of each non-empty bucket, in bucket order.
pub fn bucketed(tasks: &[Task]) -> Vec<(TaskStatus, Vec<&Task>)> {
    BUCKETS
        .iter()
        .map(|b| (*b, tasks.iter().filter(|t| t.status == *b).collect::<Vec<_>>()))
        .filter(|(_, ts)| !ts.is_empty())
        .collect()
}

pub fn print_tasks(tasks: &[Task], now: DateTime<FixedOffset>) {
    if tasks.is_empty() {
        println!("No open tasks.");
        return;
    }
    let today = now.date_naive();
    for (bucket, group) in bucketed(tasks) {
        println!("{} ({})", format_status(bucket), group.len());
        for t in group {
            let due = format_due_relative(t.due_date.with_timezone(&now.timezone()).date_naive(), today);
            println!(
                "  {:<5} {:<8} {:<9} {:<10} {}  [{}]",
                t.id,
                format_priority(t.priority),
                format_task_type(t.task_type),
                due,
                t.subject,
                t.related_to.name
            );
        }
    }
}

/// List my open tasks.
pub async fn cmd_tasks(app: &App, status: Option<TaskStatus>, json: bool) {
    let service = app.my_tasks();
    or_exit(service.refetch().await, "Failed to load tasks");
    let tasks: Vec<Task> = service
        .tasks()
        .into_iter()
        .filter(|t| status.map_or(true, |s| t.status == s))
        .collect();
    if json {
        print_json(&tasks);
    } else {
        print_tasks(&tasks, app.now());
    }
}

pub enum TaskAction {
    Complete,
    Snooze,
    Delete,
    Reschedule(String),
}

/// Apply one task mutation and persist the data file.
pub async fn cmd_task_action(app: &App, id: TaskId, action: TaskAction) {
    let service = app.my_tasks();
    or_exit(service.refetch().await, "Failed to load tasks");

    let result = match &action {
        TaskAction::Complete => service.complete_task(id).await,
        TaskAction::Snooze => service.snooze_task(id).await,
        TaskAction::Delete => service.delete_task(id).await,
        TaskAction::Reschedule(input) => {
            let now = app.now();
            let Some(day) = parse_due_input(input, now.date_naive()) else {
                eprintln!("Invalid due date: {input}");
                process::exit(1);
            };
            service.reschedule_task(id, start_of_day(day, &now.timezone())).await
        }
    };
    match result {
        Ok(()) => {}
        Err(e @ Error::TaskNotFound(_)) => {
            eprintln!("{e}");
            process::exit(1);
        }
        Err(e) => {
            eprintln!("Failed to update task {id}: {e}");
            process::exit(1);
        }
    }
    or_exit(app.save(), "Failed to save data file");

    match action {
        TaskAction::Complete => println!("Completed task {id}."),
        TaskAction::Snooze => println!("Snoozed task {id} until the end of tomorrow."),
        TaskAction::Delete => println!("Deleted task {id}."),
        TaskAction::Reschedule(_) => {
            if let Some(t) = service.tasks().into_iter().find(|t| t.id == id) {
                println!("Rescheduled task {id}: now {}.", format_status(t.status));
            }
        }
    }
}

fn metric_line(label: &str, value: MetricValue) {
    println!("{label:<24} {value}");
}

fn trend_suffix(metric: &Metric) -> String {
    match metric.trend {
        Some(t) => format!("  {} {}% (was {})", format_direction(t.direction), t.percent, t.previous),
        None => String::new(),
    }
}

/// Dashboard KPI header.
pub async fn cmd_kpi(app: &App, recent_minutes: Option<i64>, json: bool) {
    let config = or_exit(app.config.clone().with_recent_window_minutes(recent_minutes), "Invalid --recent-minutes");
    let service = KpiService::new(app.provider.clone(), app.identity.clone(), app.clock.clone(), app.thresholds)
        .with_recent_window(config.recent_window);
    service.refetch().await;
    let snap = service.snapshot();
    if json {
        print_json(&snap);
        return;
    }
    if let Some(e) = &snap.error {
        eprintln!("Could not resolve current user: {e}");
        process::exit(1);
    }

    let m = &snap.metrics;
    metric_line("Open opportunities", m.open_opportunities);
    metric_line("Stale deals", m.stale_deals);
    metric_line("Overdue tasks", m.overdue_tasks);
    let trend = snap
        .trends
        .activities_this_week
        .map(|t| format!("  {} {}%", format_direction(t.direction), t.percent))
        .unwrap_or_default();
    println!("{:<24} {}{}", "Activities this week", m.activities_this_week, trend);
    metric_line(&format!("Activity last {}m", config.recent_window.num_minutes()), m.recent_activity);

    match (&snap.error_message, snap.has_partial_failure) {
        (Some(msg), true) => eprintln!("Some metrics could not be loaded: {msg}"),
        (Some(msg), false) => eprintln!("Metrics unavailable: {msg}"),
        (None, _) => {}
    }
}

/// My week-over-week performance.
pub async fn cmd_performance(app: &App, json: bool) {
    let service = PerformanceService::new(app.provider.clone(), app.identity.clone(), app.clock.clone());
    service.refetch().await;
    let snap = service.snapshot();
    if json {
        print_json(&snap);
        return;
    }
    if let Some(e) = &snap.error {
        eprintln!("Could not resolve current user: {e}");
        process::exit(1);
    }
    let m = &snap.metrics;
    for (label, metric) in [
        ("Activities this week", &m.activities_this_week),
        ("Tasks completed", &m.tasks_completed),
        ("Deals moved", &m.deals_moved),
        ("Open opportunities", &m.open_opportunities),
    ] {
        println!("{label:<24} {}{}", metric.value, trend_suffix(metric));
    }
    match (snap.failed.is_empty(), snap.has_partial_failure) {
        (true, _) => {}
        (false, true) => eprintln!("Some metrics could not be loaded: {}", snap.failed.join(", ")),
        (false, false) => eprintln!("Metrics unavailable: {}", snap.failed.join(", ")),
    }
}

/// Principal pipeline table.
pub async fn cmd_pipeline(app: &App, mine: bool, json: bool) {
    let service = PipelineService::new(app.provider.clone(), app.identity.clone());
    service.load(mine).await;
    let snap = service.snapshot();
    if let Some(e) = &snap.error {
        eprintln!("Failed to load pipeline: {e}");
        process::exit(1);
    }
    if json {
        print_json(&snap.rows);
        return;
    }
    println!("{:<24} {:>12} {:>5} {:>5} {:<11} {}", "Principal", "Pipeline", "This", "Last", "Momentum", "Next action");
    for row in &snap.rows {
        println!(
            "{:<24} {:>12.2} {:>5} {:>5} {:<11} {}",
            truncate(&row.name, 24),
            row.total_pipeline,
            row.active_this_week,
            row.active_last_week,
            format!("{:?}", row.momentum).to_lowercase(),
            row.next_action_summary.as_deref().unwrap_or("-")
        );
    }
}

#[derive(Debug, Serialize)]
pub struct StaleRow {
    pub id: Option<i64>,
    pub name: String,
    pub stage: String,
    pub days_idle: Option<i64>,
    pub threshold: Option<i64>,
}

/// Open opportunities past their stage's threshold.
pub async fn cmd_stale(app: &App, json: bool) {
    let params = ListParams::new()
        .filter("stage@not_in", closed_stages())
        .sort("last_activity_date", SortOrder::Asc)
        .page(1, STALE_CANDIDATE_LIMIT);
    let list = or_exit(
        app.provider.list("opportunities", params).await.map_err(Error::from),
        "Failed to load opportunities",
    );
    let now = app.now().with_timezone(&Utc);
    let rows = stale_rows(&list.data, now, &app.thresholds);
    if json {
        print_json(&rows);
        return;
    }
    if rows.is_empty() {
        println!("No stale opportunities.");
        return;
    }
    println!("{:<5} {:<28} {:<22} {}", "ID", "Opportunity", "Stage", "Idle");
    for r in &rows {
        let idle = match (r.days_idle, r.threshold) {
            (Some(d), Some(t)) => format!("{d}d (limit {t}d)"),
            _ => "never active".to_string(),
        };
        let id = r.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        println!("{:<5} {:<28} {:<22} {}", id, truncate(&r.name, 28), r.stage, idle);
    }
}

pub fn stale_rows(records: &[Value], now: DateTime<Utc>, thresholds: &StaleThresholds) -> Vec<StaleRow> {
    records
        .iter()
        .filter_map(|rec| {
            let opp: OpportunityActivity = serde_json::from_value(rec.clone()).ok()?;
            if !opp.is_stale(now, thresholds) {
                return None;
            }
            Some(StaleRow {
                id: opp.id,
                name: rec.get("name").and_then(Value::as_str).unwrap_or("(unnamed)").to_string(),
                days_idle: days_since_activity(opp.last_activity(), now),
                threshold: thresholds.for_stage_name(&opp.stage),
                stage: opp.stage,
            })
        })
        .collect()
}

/// Recently viewed records.
pub fn cmd_recent(app: &App, action: Option<RecentAction>) {
    let store = RecentItems::new(Box::new(JsonFileStorage::new(&app.config.recent_path)));
    match action.unwrap_or(RecentAction::List) {
        RecentAction::List => {
            let items = store.snapshot();
            if items.is_empty() {
                println!("Nothing viewed recently.");
            }
            for item in items.iter() {
                println!("{:<16} {:<6} {}", item.resource, item.id, item.label);
            }
        }
        RecentAction::Add { resource, id, label } => {
            let label = label.unwrap_or_else(|| format!("{resource} #{id}"));
            store.add(RecentItem { resource, id, label, viewed_at: app.now().with_timezone(&Utc) });
            println!("Added.");
        }
        RecentAction::Clear => {
            store.clear();
            println!("Cleared.");
        }
    }
}

pub fn cmd_completions(shell: Shell) {
    use crate::cli::Cli;
    use clap::CommandFactory;

    let mut app = Cli::command();
    let app_name = app.get_name().to_string();
    generate(shell, &mut app, app_name, &mut std::io::stdout());
}

/// Truncate a string to a maximum width, adding ellipsis if needed.
pub fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        return s.to_string();
    }
    let mut out: String = s.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
