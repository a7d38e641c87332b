//! Task data structure and its mapping from backend rows.
//!
//! This module defines the `Task` struct the rest of the crate works with, and
//! `TaskRow`, the loosely typed shape the `tasks` resource returns. Mapping a
//! row never fails on missing optional fields: each one has a defined default.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::dates::{calculate_status, parse_timestamp};
use crate::fields::*;
use crate::provider::{ProviderError, Record};

pub type TaskId = i64;

/// The entity a task is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTo {
    pub kind: RelatedKind,
    pub id: i64,
    pub name: String,
}

/// A task as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub subject: String,
    pub due_date: DateTime<Utc>,
    pub priority: Priority,
    pub task_type: TaskType,
    pub completed: bool,
    pub snooze_until: Option<DateTime<Utc>>,
    pub related_to: RelatedTo,
    pub notes: Option<String>,
    /// Derived from `due_date` at read time.
    pub status: TaskStatus,
    /// Still visible while a completion workflow is open.
    #[serde(default)]
    pub pending_completion: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Named {
    #[serde(default)]
    pub name: Option<String>,
}

/// A row of the `tasks` resource, related entities optionally expanded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub snooze_until: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub opportunity_id: Option<i64>,
    #[serde(default)]
    pub contact_id: Option<i64>,
    #[serde(default)]
    pub organization_id: Option<i64>,
    #[serde(default)]
    pub opportunity: Option<Named>,
    #[serde(default)]
    pub contact: Option<Named>,
    #[serde(default)]
    pub organization: Option<Named>,
}

impl TaskRow {
    fn related_to(&self) -> RelatedTo {
        let (kind, id) = match (self.opportunity_id, self.contact_id, self.organization_id) {
            (Some(id), _, _) => (RelatedKind::Opportunity, id),
            (None, Some(id), _) => (RelatedKind::Contact, id),
            (None, None, Some(id)) => (RelatedKind::Organization, id),
            (None, None, None) => (RelatedKind::Personal, 0),
        };
        let name = [&self.opportunity, &self.contact, &self.organization]
            .into_iter()
            .flatten()
            .find_map(|n| n.name.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "Personal Task".to_string());
        RelatedTo { kind, id, name }
    }
}

impl Task {
    /// Map a backend row. A missing or unparseable due date becomes `now`.
    pub fn from_row(row: TaskRow, now: DateTime<FixedOffset>) -> Task {
        let due_date = row
            .due_date
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or_else(|| now.with_timezone(&Utc));
        let related_to = row.related_to();
        Task {
            id: row.id,
            subject: row
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "Untitled Task".to_string()),
            due_date,
            priority: row.priority.as_deref().and_then(Priority::from_wire).unwrap_or_default(),
            task_type: row.task_type.as_deref().map(TaskType::from_wire).unwrap_or_default(),
            completed: row.completed.unwrap_or(false),
            snooze_until: row.snooze_until.as_deref().and_then(parse_timestamp),
            related_to,
            notes: row.notes,
            status: calculate_status(due_date, now),
            pending_completion: false,
        }
    }

    pub fn from_record(record: &Record, now: DateTime<FixedOffset>) -> Result<Task, ProviderError> {
        let row: TaskRow = serde_json::from_value(record.clone())
            .map_err(|e| ProviderError::Serialization(e.to_string()))?;
        Ok(Task::from_row(row, now))
    }

    /// Hidden from the active list until `snooze_until` passes.
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.is_some_and(|until| until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<FixedOffset> {
        Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap().fixed_offset()
    }

    #[test]
    fn maps_full_row() {
        let rec = json!({
            "id": 5,
            "subject": "Send pricing",
            "due_date": "2025-11-29T09:00:00Z",
            "priority": "high",
            "type": "Email",
            "completed": false,
            "contact_id": 9,
            "contact": {"name": "Dana"},
        });
        let t = Task::from_record(&rec, now()).unwrap();
        assert_eq!(t.subject, "Send pricing");
        assert_eq!(t.priority, Priority::High);
        assert_eq!(t.task_type, TaskType::Email);
        assert_eq!(t.status, TaskStatus::Tomorrow);
        assert_eq!(t.related_to, RelatedTo { kind: RelatedKind::Contact, id: 9, name: "Dana".into() });
    }

    #[test]
    fn sparse_row_gets_defaults() {
        let t = Task::from_record(&json!({"id": 1, "due_date": "garbage"}), now()).unwrap();
        assert_eq!(t.subject, "Untitled Task");
        assert_eq!(t.priority, Priority::Medium);
        assert_eq!(t.task_type, TaskType::Other);
        assert_eq!(t.status, TaskStatus::Today);
        assert_eq!(t.related_to.kind, RelatedKind::Personal);
        assert_eq!(t.related_to.name, "Personal Task");
        assert_eq!(t.related_to.id, 0);
    }

    #[test]
    fn opportunity_wins_over_other_relations() {
        let t = Task::from_record(
            &json!({"id": 2, "opportunity_id": 3, "organization_id": 4,
                    "opportunity": {"name": "Big deal"}, "organization": {"name": "Acme"}}),
            now(),
        )
        .unwrap();
        assert_eq!(t.related_to, RelatedTo { kind: RelatedKind::Opportunity, id: 3, name: "Big deal".into() });
    }

    #[test]
    fn snooze_hides_until_it_passes() {
        let t = Task::from_record(&json!({"id": 3, "snooze_until": "2025-11-29T23:59:59Z"}), now()).unwrap();
        assert!(t.is_snoozed(now().with_timezone(&Utc)));
        assert!(!t.is_snoozed(Utc.with_ymd_and_hms(2025, 11, 30, 0, 0, 0).unwrap()));
    }
}
