//! Enumerations and field types for tasks, pipeline stages and metrics.
//!
//! This module defines the closed vocabularies shared across the crate: task
//! priorities and types, due-date status buckets, related-entity kinds, pipeline
//! stages, momentum classes and trend directions.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Task importance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Lenient wire parse; anything unrecognised is `None`.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

/// Kind of follow-up a task represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Call,
    Email,
    Meeting,
    FollowUp,
    Demo,
    Proposal,
    #[default]
    Other,
}

impl TaskType {
    /// Case-insensitive wire parse, falling back to `Other`.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "call" => TaskType::Call,
            "email" => TaskType::Email,
            "meeting" => TaskType::Meeting,
            "follow-up" => TaskType::FollowUp,
            "demo" => TaskType::Demo,
            "proposal" => TaskType::Proposal,
            _ => TaskType::Other,
        }
    }
}

/// Due-date bucket of a task relative to today. Derived, never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Overdue,
    Today,
    Tomorrow,
    Upcoming,
    Later,
}

/// The entity a task hangs off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RelatedKind {
    Opportunity,
    Contact,
    Organization,
    #[default]
    Personal,
}

/// Opportunity pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    NewLead,
    InitialOutreach,
    SampleVisitOffered,
    FeedbackLogged,
    DemoScheduled,
    ClosedWon,
    ClosedLost,
}

/// Stages that are still moving through the pipeline.
pub const ACTIVE_STAGES: [Stage; 5] = [
    Stage::NewLead,
    Stage::InitialOutreach,
    Stage::SampleVisitOffered,
    Stage::FeedbackLogged,
    Stage::DemoScheduled,
];

/// Terminal stages; never evaluated for staleness.
pub const CLOSED_STAGES: [Stage; 2] = [Stage::ClosedWon, Stage::ClosedLost];

impl Stage {
    /// Wire name as stored in the `stage` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NewLead => "new_lead",
            Stage::InitialOutreach => "initial_outreach",
            Stage::SampleVisitOffered => "sample_visit_offered",
            Stage::FeedbackLogged => "feedback_logged",
            Stage::DemoScheduled => "demo_scheduled",
            Stage::ClosedWon => "closed_won",
            Stage::ClosedLost => "closed_lost",
        }
    }

    pub fn is_closed(self) -> bool {
        CLOSED_STAGES.contains(&self)
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ACTIVE_STAGES
            .iter()
            .chain(CLOSED_STAGES.iter())
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{s}'"))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity momentum of a principal, classified server-side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Momentum {
    Increasing,
    #[default]
    Steady,
    Decreasing,
    Stale,
}

/// Week-over-week direction of a metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    #[default]
    Flat,
}

/// Format a priority for display.
pub fn format_priority(p: Priority) -> &'static str {
    match p {
        Priority::Low => "Low",
        Priority::Medium => "Medium",
        Priority::High => "High",
        Priority::Critical => "Critical",
    }
}

/// Format a task type for display.
pub fn format_task_type(t: TaskType) -> &'static str {
    match t {
        TaskType::Call => "Call",
        TaskType::Email => "Email",
        TaskType::Meeting => "Meeting",
        TaskType::FollowUp => "Follow-up",
        TaskType::Demo => "Demo",
        TaskType::Proposal => "Proposal",
        TaskType::Other => "Other",
    }
}

/// Format a status bucket for display.
pub fn format_status(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Overdue => "Overdue",
        TaskStatus::Today => "Today",
        TaskStatus::Tomorrow => "Tomorrow",
        TaskStatus::Upcoming => "Upcoming",
        TaskStatus::Later => "Later",
    }
}

/// Format a trend direction as an arrow.
pub fn format_direction(d: TrendDirection) -> &'static str {
    match d {
        TrendDirection::Up => "↑",
        TrendDirection::Down => "↓",
        TrendDirection::Flat => "→",
    }
}
