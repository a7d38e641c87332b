//! The current user's task list with optimistic mutations.
//!
//! `MyTasks` owns two pieces of state: the last server list and the optimistic
//! overlay. Readers always see `merge(server, overlay)`. Each mutation runs the
//! same lifecycle: check the task is visible, cancel in-flight task reads,
//! snapshot the overlay and apply the optimistic patch in one critical
//! section, call the backend, then commit or roll back, and finally invalidate
//! every affected cache domain whatever the outcome.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::cache::{invalidate_for, Domain, MutationKind, QueryCache};
use crate::dates::{calculate_status, end_of_day, to_wire, Clock};
use crate::error::{Error, Result};
use crate::fields::TaskStatus;
use crate::identity::IdentityService;
use crate::mutation::{CompletionMode, MutationEvent, MutationPhase, MutationPlan};
use crate::overlay::{merge, Overlay, TaskPatch};
use crate::provider::{DataProvider, DeleteParams, ListParams, Record, SortOrder, UpdateParams};
use crate::task::{Task, TaskId};

const RESOURCE: &str = "tasks";
pub const TASK_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default)]
struct TasksState {
    server: Vec<Task>,
    records: BTreeMap<TaskId, Record>,
    overlay: Overlay,
    phases: BTreeMap<TaskId, MutationPhase>,
    loading: bool,
    loaded: bool,
    error: Option<String>,
    seen_generation: u64,
}

impl TasksState {
    fn advance(&mut self, task_id: TaskId, event: MutationEvent) {
        let current = match event {
            MutationEvent::Apply => MutationPhase::Idle,
            _ => self.phases.get(&task_id).copied().unwrap_or(MutationPhase::Idle),
        };
        match current.on(event) {
            Some(next) => {
                debug!(task_id, from = ?current, to = ?next, "mutation transition");
                self.phases.insert(task_id, next);
            }
            None => warn!(task_id, phase = ?current, ?event, "ignored invalid mutation transition"),
        }
    }
}

enum RemoteCall {
    Update(Value),
    Delete,
}

pub struct MyTasks {
    provider: Arc<dyn DataProvider>,
    identity: Arc<dyn IdentityService>,
    cache: Arc<QueryCache>,
    clock: Arc<dyn Clock>,
    state: Mutex<TasksState>,
}

impl MyTasks {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        identity: Arc<dyn IdentityService>,
        cache: Arc<QueryCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        MyTasks { provider, identity, cache, clock, state: Mutex::new(TasksState::default()) }
    }

    /// The rendered list: server tasks merged with the overlay.
    pub fn tasks(&self) -> Vec<Task> {
        let st = self.state.lock();
        merge(&st.server, &st.overlay, self.clock.now())
    }

    pub fn loading(&self) -> bool {
        self.state.lock().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    pub fn overlay(&self) -> Overlay {
        self.state.lock().overlay.clone()
    }

    pub fn phase(&self, task_id: TaskId) -> MutationPhase {
        self.state.lock().phases.get(&task_id).copied().unwrap_or(MutationPhase::Idle)
    }

    pub fn calculate_status(&self, due: DateTime<Utc>) -> TaskStatus {
        calculate_status(due, self.clock.now())
    }

    /// Reload the server list. Results of a read cancelled by a mutation are discarded.
    pub async fn refetch(&self) -> Result<()> {
        let sales_id = match self.identity.current_sales_id().await {
            Ok(Some(id)) => id,
            Ok(None) => {
                let mut st = self.state.lock();
                st.server.clear();
                st.records.clear();
                st.loading = false;
                return Ok(());
            }
            Err(e) => {
                self.state.lock().error = Some(e.to_string());
                return Err(e);
            }
        };

        let generation = self.cache.generation(Domain::Tasks);
        let token = self.cache.begin_fetch(Domain::Tasks);
        self.state.lock().loading = true;

        let params = ListParams::new()
            .filter("sales_id", sales_id)
            .filter("completed", false)
            .filter("deleted_at@is", Value::Null)
            .sort("due_date", SortOrder::Asc)
            .page(1, TASK_PAGE_SIZE)
            .expand(["opportunity", "contact", "organization"]);

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            res = self.provider.list(RESOURCE, params) => Some(res),
        };
        let Some(result) = result.filter(|_| !token.is_cancelled()) else {
            debug!(feature = "my_tasks", "task read superseded by a mutation; discarding");
            self.state.lock().loading = false;
            return Ok(());
        };

        let list = match result {
            Ok(list) => list,
            Err(e) => {
                error!(feature = "my_tasks", error = %e, "failed to fetch tasks");
                let mut st = self.state.lock();
                st.loading = false;
                st.error = Some(e.to_string());
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        let now_utc = now.with_timezone(&Utc);
        let mut server = Vec::with_capacity(list.data.len());
        let mut records = BTreeMap::new();
        for record in list.data {
            match Task::from_record(&record, now) {
                Ok(task) if task.is_snoozed(now_utc) => {}
                Ok(task) => {
                    records.insert(task.id, record);
                    server.push(task);
                }
                Err(e) => warn!(feature = "my_tasks", error = %e, "skipping malformed task row"),
            }
        }

        let present: BTreeSet<TaskId> = server.iter().map(|t| t.id).collect();
        let mut st = self.state.lock();
        let TasksState { overlay, phases, .. } = &mut *st;
        // Tombstones outlive the task only while its mutation is still open.
        overlay.retain(|id, _| present.contains(id) || phases.get(id).is_some_and(|p| p.is_open()));
        phases.retain(|id, phase| present.contains(id) || phase.is_open());
        st.server = server;
        st.records = records;
        st.loading = false;
        st.loaded = true;
        st.error = None;
        st.seen_generation = generation;
        Ok(())
    }

    /// Refetch when never loaded or when the tasks domain was invalidated since.
    pub async fn refresh_if_stale(&self) -> Result<bool> {
        let (loaded, seen) = {
            let st = self.state.lock();
            (st.loaded, st.seen_generation)
        };
        if loaded && !self.cache.is_stale(Domain::Tasks, seen) {
            return Ok(false);
        }
        self.refetch().await?;
        Ok(true)
    }

    /// Complete a task, hiding it immediately.
    pub async fn complete_task(&self, task_id: TaskId) -> Result<()> {
        self.complete_with(task_id, CompletionMode::Immediate).await
    }

    /// Complete a task, keeping it visible as pending until the server confirms.
    pub async fn begin_completion(&self, task_id: TaskId) -> Result<()> {
        self.complete_with(task_id, CompletionMode::Deferred).await
    }

    async fn complete_with(&self, task_id: TaskId, mode: CompletionMode) -> Result<()> {
        let now = self.clock.now().with_timezone(&Utc);
        let data = json!({ "completed": true, "completed_at": to_wire(now) });
        self.mutate(MutationKind::CompleteTask, task_id, MutationPlan::complete(mode), RemoteCall::Update(data))
            .await
    }

    /// Hide a task until the end of the following day. The due date is untouched.
    pub async fn snooze_task(&self, task_id: TaskId) -> Result<()> {
        let now = self.clock.now();
        let until = end_of_day(now.date_naive() + Duration::days(1), &now.timezone());
        let mut plan = MutationPlan::hide();
        plan.optimistic.snooze_until = Some(until);
        plan.committed.snooze_until = Some(until);
        let data = json!({ "snooze_until": to_wire(until) });
        self.mutate(MutationKind::SnoozeTask, task_id, plan, RemoteCall::Update(data)).await
    }

    pub async fn delete_task(&self, task_id: TaskId) -> Result<()> {
        self.mutate(MutationKind::DeleteTask, task_id, MutationPlan::hide(), RemoteCall::Delete)
            .await
    }

    /// Move a task to a new due date; it stays visible in its new bucket.
    pub async fn reschedule_task(&self, task_id: TaskId, due: DateTime<Utc>) -> Result<()> {
        let plan = MutationPlan::patch(TaskPatch::reschedule(due, self.calculate_status(due)));
        let data = json!({ "due_date": to_wire(due) });
        self.mutate(MutationKind::RescheduleTask, task_id, plan, RemoteCall::Update(data)).await
    }

    /// Layer a local-only patch over a task, e.g. while dragging between columns.
    pub fn update_task_locally(&self, task_id: TaskId, patch: TaskPatch) {
        self.state.lock().overlay.entry(task_id).or_default().merge(patch);
    }

    /// Drop any local patch for a task.
    pub fn rollback_task(&self, task_id: TaskId) {
        self.state.lock().overlay.remove(&task_id);
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        task_id: TaskId,
        plan: MutationPlan,
        call: RemoteCall,
    ) -> Result<()> {
        // Everything up to the remote call happens in one critical section so
        // the patch is visible before any await.
        let (previous, snapshot) = {
            let mut st = self.state.lock();
            let visible = merge(&st.server, &st.overlay, self.clock.now());
            let Some(task) = visible.into_iter().find(|t| t.id == task_id) else {
                return Err(Error::TaskNotFound(task_id));
            };
            // One open mutation per task; its rollback snapshot would not know about a second.
            if st.phases.get(&task_id).is_some_and(|p| p.is_open()) {
                return Err(Error::MutationPending(task_id));
            }
            let previous = match st.records.get(&task_id) {
                Some(record) => record.clone(),
                None => serde_json::to_value(&task)?,
            };
            self.cache.cancel_inflight(Domain::Tasks);
            let snapshot = st.overlay.clone();
            st.overlay.entry(task_id).or_default().merge(plan.optimistic.clone());
            st.advance(task_id, MutationEvent::Apply);
            (previous, snapshot)
        };

        self.state.lock().advance(task_id, MutationEvent::Dispatch);
        let outcome = match call {
            RemoteCall::Update(data) => self
                .provider
                .update(RESOURCE, UpdateParams { id: task_id, data, previous_data: previous })
                .await
                .map(drop),
            RemoteCall::Delete => self
                .provider
                .delete(RESOURCE, DeleteParams { id: task_id, previous_data: previous })
                .await
                .map(drop),
        };

        {
            let mut st = self.state.lock();
            match &outcome {
                Ok(()) => {
                    let entry = st.overlay.entry(task_id).or_default();
                    entry.merge(plan.committed.clone());
                    if plan.committed.deleted {
                        entry.pending_completion = false;
                    }
                    st.advance(task_id, MutationEvent::Succeed);
                }
                Err(e) => {
                    match snapshot.get(&task_id) {
                        Some(patch) => st.overlay.insert(task_id, patch.clone()),
                        None => st.overlay.remove(&task_id),
                    };
                    st.advance(task_id, MutationEvent::Fail);
                    error!(feature = "my_tasks", task_id, action = kind.name(), error = %e, "task mutation failed; rolled back");
                }
            }
        }

        invalidate_for(self.cache.as_ref(), kind);
        self.state.lock().advance(task_id, MutationEvent::Settle);
        outcome.map_err(Error::from)
    }
}
