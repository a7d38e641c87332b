use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::cmd::Commands;

/// Dashboard tasks and metrics for a CRM sales rep.
/// Data defaults to ~/.crm/crm.json or a path passed via --db.
#[derive(Parser)]
#[command(name = "crmd", version, about = "CRM dashboard: my tasks, KPIs and pipeline")]
pub struct Cli {
    /// Path to the JSON data file.
    #[arg(long, global = true, env = "CRM_DB")]
    pub db: Option<PathBuf>,

    /// Auth user id of the signed-in rep, looked up in `sales`.
    #[arg(long, global = true, env = "CRM_USER")]
    pub user: Option<String>,

    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}
