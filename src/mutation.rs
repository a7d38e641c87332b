//! Lifecycle of one optimistic mutation.
//!
//! ```text
//! Idle --apply--> OptimisticApplied --dispatch--> InFlight --succeed--> Committed --settle--> Settled
//!                                                         \--fail----> RolledBack --settle--> Settled
//! ```

use crate::overlay::TaskPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    OptimisticApplied,
    InFlight,
    Committed,
    RolledBack,
    Settled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationEvent {
    Apply,
    Dispatch,
    Succeed,
    Fail,
    Settle,
}

impl MutationPhase {
    /// Next phase, or `None` if `event` is not valid here.
    pub fn on(self, event: MutationEvent) -> Option<MutationPhase> {
        use MutationEvent::*;
        use MutationPhase::*;
        match (self, event) {
            (Idle, Apply) => Some(OptimisticApplied),
            (OptimisticApplied, Dispatch) => Some(InFlight),
            (InFlight, Succeed) => Some(Committed),
            (InFlight, Fail) => Some(RolledBack),
            (Committed, Settle) | (RolledBack, Settle) => Some(Settled),
            _ => None,
        }
    }

    /// Started and not yet settled.
    pub fn is_open(self) -> bool {
        !matches!(self, MutationPhase::Idle | MutationPhase::Settled)
    }
}

/// When a completed task leaves the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionMode {
    /// Hidden as soon as the action is taken.
    #[default]
    Immediate,
    /// Kept visible as pending until the server confirms, then hidden.
    Deferred,
}

/// The overlay patches a mutation writes before and after the remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub optimistic: TaskPatch,
    pub committed: TaskPatch,
}

impl MutationPlan {
    pub fn complete(mode: CompletionMode) -> Self {
        let optimistic = match mode {
            CompletionMode::Immediate => TaskPatch::tombstone(),
            CompletionMode::Deferred => TaskPatch::pending_completion(),
        };
        MutationPlan { optimistic, committed: TaskPatch::tombstone() }
    }

    pub fn hide() -> Self {
        MutationPlan { optimistic: TaskPatch::tombstone(), committed: TaskPatch::tombstone() }
    }

    pub fn patch(patch: TaskPatch) -> Self {
        MutationPlan { optimistic: patch.clone(), committed: patch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MutationEvent::*;
    use MutationPhase::*;

    fn run(events: &[MutationEvent]) -> Option<MutationPhase> {
        events.iter().try_fold(Idle, |phase, e| phase.on(*e))
    }

    #[test]
    fn success_and_failure_paths_both_settle() {
        assert_eq!(run(&[Apply, Dispatch, Succeed, Settle]), Some(Settled));
        assert_eq!(run(&[Apply, Dispatch, Fail, Settle]), Some(Settled));
        assert_eq!(run(&[Apply, Dispatch, Fail]), Some(RolledBack));
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        assert_eq!(run(&[Dispatch]), None);
        assert_eq!(run(&[Apply, Succeed]), None);
        assert_eq!(run(&[Apply, Dispatch, Settle]), None);
        assert_eq!(Settled.on(Apply), None);
    }

    #[test]
    fn only_started_unsettled_phases_are_open() {
        assert!(!Idle.is_open());
        assert!(OptimisticApplied.is_open());
        assert!(InFlight.is_open());
        assert!(RolledBack.is_open());
        assert!(!Settled.is_open());
    }

    #[test]
    fn completion_is_two_step_when_deferred() {
        let plan = MutationPlan::complete(CompletionMode::Deferred);
        assert!(plan.optimistic.pending_completion && !plan.optimistic.deleted);
        assert!(plan.committed.deleted);

        let plan = MutationPlan::complete(CompletionMode::Immediate);
        assert!(plan.optimistic.deleted);
    }
}
