//! # crmd - CRM dashboard CLI
//!
//! Command-line front end to the `crm_dashboard` library: list and act on the
//! signed-in rep's tasks, and print the dashboard KPI header, week-over-week
//! performance and principal pipeline.
//!
//! ## Key Commands
//!
//! - `crmd tasks` - Open tasks grouped into overdue / today / tomorrow / upcoming / later
//! - `crmd complete|snooze|delete <id>` - Optimistic task actions
//! - `crmd reschedule <id> <due>` - Move a task ("friday", "in 3d", "2025-12-01")
//! - `crmd kpi` - Dashboard KPIs, `?` where a metric could not be loaded
//! - `crmd performance` - My week-over-week metrics
//! - `crmd pipeline [--mine]` - Principal pipeline, largest first
//! - `crmd stale` - Opportunities idle past their stage's threshold
//! - `crmd recent` - Recently viewed records
//!
//! Data is stored locally in `~/.crm/crm.json`. Logs go to stderr (`-v`, `-vv`, or `RUST_LOG`).

use clap::Parser;

use crm_dashboard::cli::Cli;
use crm_dashboard::cmd::*;
use crm_dashboard::config::{home_dir, Config};
use crm_dashboard::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Completions need no data file.
    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return;
    }

    let config = or_exit(
        Config::resolve(cli.db, cli.user, cli.verbose, home_dir().as_deref()),
        "Configuration error",
    );
    let app = or_exit(App::open(config), "Failed to open data file");

    match cli.command {
        Commands::Tasks { status, json } => cmd_tasks(&app, status, json).await,

        Commands::Complete { id } => cmd_task_action(&app, id, TaskAction::Complete).await,

        Commands::Snooze { id } => cmd_task_action(&app, id, TaskAction::Snooze).await,

        Commands::Delete { id } => cmd_task_action(&app, id, TaskAction::Delete).await,

        Commands::Reschedule { id, due } => cmd_task_action(&app, id, TaskAction::Reschedule(due)).await,

        Commands::Kpi { recent_minutes, json } => cmd_kpi(&app, recent_minutes, json).await,

        Commands::Performance { json } => cmd_performance(&app, json).await,

        Commands::Pipeline { mine, json } => cmd_pipeline(&app, mine, json).await,

        Commands::Stale { json } => cmd_stale(&app, json).await,

        Commands::Recent { action } => cmd_recent(&app, action),

        Commands::Completions { .. } => unreachable!("completions handled above"),
    }
}
