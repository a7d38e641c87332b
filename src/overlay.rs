//! Optimistic patch overlay and the pure server+overlay merge.
//!
//! The rendered task list is always the server list with each task's patch
//! applied, minus every task whose patch carries the `deleted` tombstone.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};

use crate::dates::calculate_status;
use crate::fields::{Priority, TaskStatus};
use crate::task::{Task, TaskId};

/// Partial field overrides for one task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub subject: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub snooze_until: Option<DateTime<Utc>>,
    pub completed: Option<bool>,
    /// Hide from view.
    pub deleted: bool,
    /// Keep visible while a completion is in flight.
    pub pending_completion: bool,
}

impl TaskPatch {
    pub fn tombstone() -> Self {
        TaskPatch { deleted: true, ..TaskPatch::default() }
    }

    pub fn pending_completion() -> Self {
        TaskPatch { pending_completion: true, ..TaskPatch::default() }
    }

    pub fn reschedule(due_date: DateTime<Utc>, status: TaskStatus) -> Self {
        TaskPatch { due_date: Some(due_date), status: Some(status), ..TaskPatch::default() }
    }

    /// Layer `other` on top of `self`; set fields in `other` win.
    pub fn merge(&mut self, other: TaskPatch) {
        if other.subject.is_some() {
            self.subject = other.subject;
        }
        if other.due_date.is_some() {
            self.due_date = other.due_date;
        }
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.priority.is_some() {
            self.priority = other.priority;
        }
        if other.snooze_until.is_some() {
            self.snooze_until = other.snooze_until;
        }
        if other.completed.is_some() {
            self.completed = other.completed;
        }
        self.deleted |= other.deleted;
        self.pending_completion |= other.pending_completion;
    }

    fn apply(&self, task: &mut Task) {
        if let Some(subject) = &self.subject {
            task.subject = subject.clone();
        }
        if let Some(due) = self.due_date {
            task.due_date = due;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if self.snooze_until.is_some() {
            task.snooze_until = self.snooze_until;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        task.pending_completion = self.pending_completion;
    }
}

pub type Overlay = BTreeMap<TaskId, TaskPatch>;

/// Render the visible task list.
///
/// Status is recomputed from the due date against `now`; an explicit status in
/// a patch overrides it.
pub fn merge(server: &[Task], overlay: &Overlay, now: DateTime<FixedOffset>) -> Vec<Task> {
    server
        .iter()
        .filter(|task| !overlay.get(&task.id).is_some_and(|p| p.deleted))
        .map(|task| {
            let mut task = task.clone();
            task.status = calculate_status(task.due_date, now);
            if let Some(patch) = overlay.get(&task.id) {
                patch.apply(&mut task);
            }
            task
        })
        .collect()
}
