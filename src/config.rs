//! Runtime configuration resolved from the command line and environment.

use std::path::{Path, PathBuf};

use chrono::Duration;

use crate::error::{Error, Result};
use crate::kpi::DEFAULT_RECENT_WINDOW_MINUTES;

pub const DEFAULT_DIR: &str = ".crm";
pub const DEFAULT_DB_FILE: &str = "crm.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// JSON data file backing the local provider.
    pub db_path: PathBuf,
    /// Recent-items list, stored next to the data file.
    pub recent_path: PathBuf,
    /// Auth user id looked up in `sales`; `None` runs anonymously.
    pub user: Option<String>,
    pub verbosity: u8,
    pub recent_window: Duration,
}

impl Config {
    /// Resolve paths. Without `--db` the data lives in `~/.crm/crm.json`,
    /// and the directory is created on first use.
    pub fn resolve(db: Option<PathBuf>, user: Option<String>, verbosity: u8, home: Option<&Path>) -> Result<Config> {
        let db_path = match db {
            Some(path) => path,
            None => {
                let home = home.ok_or_else(|| Error::Config("HOME is not set; pass --db".into()))?;
                let dir = home.join(DEFAULT_DIR);
                std::fs::create_dir_all(&dir)
                    .map_err(|e| Error::Config(format!("failed to create {}: {e}", dir.display())))?;
                dir.join(DEFAULT_DB_FILE)
            }
        };
        let recent_path = recent_path_for(&db_path);
        Ok(Config {
            db_path,
            recent_path,
            user: user.filter(|u| !u.trim().is_empty()),
            verbosity,
            recent_window: Duration::minutes(DEFAULT_RECENT_WINDOW_MINUTES),
        })
    }

    /// Override the recent-activity window. Non-positive values keep the default.
    pub fn with_recent_window_minutes(mut self, minutes: Option<i64>) -> Result<Self> {
        if let Some(minutes) = minutes.filter(|m| *m > 0) {
            self.recent_window = Duration::try_minutes(minutes)
                .ok_or_else(|| Error::Config(format!("recent window of {minutes} minutes is out of range")))?;
        }
        Ok(self)
    }
}

/// `crm.json` -> `crm.recent.json`, in the same directory.
pub fn recent_path_for(db_path: &Path) -> PathBuf {
    let stem = db_path.file_stem().and_then(|s| s.to_str()).unwrap_or("crm");
    db_path.with_file_name(format!("{stem}.recent.json"))
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}
