//! # crm_dashboard
//!
//! The task and metrics state layer behind a CRM sales dashboard.
//!
//! ## What it does
//!
//! - **My tasks** ([`tasks::MyTasks`]): the signed-in rep's open tasks, bucketed
//!   by due date, with optimistic complete / snooze / delete / reschedule. The
//!   rendered list is always the server list merged with a local patch overlay;
//!   failed mutations roll the overlay back to its pre-mutation snapshot.
//! - **Dashboard aggregates** ([`kpi`], [`performance`], [`pipeline`]): batches
//!   of count-only queries awaited with all-settled semantics. A failed query
//!   yields an explicit unknown value, never zero.
//! - **Cache coordination** ([`cache`]): every task mutation invalidates all
//!   dependent cache domains when it settles, success or not.
//! - **Pure calculators** ([`dates`], [`staleness`], [`trend`]).
//!
//! All remote access goes through the [`provider::DataProvider`] trait. The
//! bundled [`memory::InMemoryProvider`] evaluates the same filter language over
//! a local JSON file and backs the `crmd` binary and the tests.
//!
//! ## Quick start
//!
//! ```bash
//! crmd --user 3f2c... tasks
//! crmd complete 42
//! crmd kpi --json
//! crmd pipeline --mine
//! ```
//!
//! Data is stored in `~/.crm/crm.json` unless `--db` (or `CRM_DB`) points elsewhere.

pub mod aggregate;
pub mod cache;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod dates;
pub mod error;
pub mod fields;
pub mod identity;
pub mod kpi;
pub mod logging;
pub mod memory;
pub mod metric;
pub mod mutation;
pub mod overlay;
pub mod performance;
pub mod pipeline;
pub mod provider;
pub mod recent;
pub mod staleness;
pub mod task;
pub mod tasks;
pub mod trend;

pub use error::{Error, Result};
