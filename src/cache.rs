//! Cache namespaces and the invalidation registry.
//!
//! Cached query results are grouped into a fixed set of logical domains. Every
//! mutation kind declares which domains it makes stale, and settling a
//! mutation invalidates all of them together. `QueryCache` is the shared
//! coordinator: it versions each domain, broadcasts invalidations to
//! interested consumers and lets a mutation cancel in-flight reads of a domain
//! before writing its optimistic patch.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A cache key as consumers outside this crate address it.
pub type QueryKey = &'static [&'static str];

/// Stable keys for every namespace.
pub mod keys {
    use super::QueryKey;

    pub const TASKS_ALL: QueryKey = &["tasks"];
    pub const OPPORTUNITIES_ALL: QueryKey = &["opportunities"];
    pub const ACTIVITIES_ALL: QueryKey = &["activities"];
    pub const DASHBOARD_ALL: QueryKey = &["dashboard"];
    pub const ENTITY_TIMELINE_ALL: QueryKey = &["entity_timeline"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Tasks,
    Opportunities,
    Activities,
    Dashboard,
    EntityTimelines,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Tasks,
        Domain::Opportunities,
        Domain::Activities,
        Domain::Dashboard,
        Domain::EntityTimelines,
    ];

    pub fn key(self) -> QueryKey {
        match self {
            Domain::Tasks => keys::TASKS_ALL,
            Domain::Opportunities => keys::OPPORTUNITIES_ALL,
            Domain::Activities => keys::ACTIVITIES_ALL,
            Domain::Dashboard => keys::DASHBOARD_ALL,
            Domain::EntityTimelines => keys::ENTITY_TIMELINE_ALL,
        }
    }
}

/// Every state-changing action the task controller performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    CompleteTask,
    SnoozeTask,
    DeleteTask,
    RescheduleTask,
}

impl MutationKind {
    /// Domains a settled mutation of this kind makes stale.
    ///
    /// Task state feeds task lists, opportunity next-actions, the activity
    /// feed, dashboard counts and entity timelines, so all four task
    /// mutations touch every domain.
    pub fn affected_domains(self) -> &'static [Domain] {
        match self {
            MutationKind::CompleteTask
            | MutationKind::SnoozeTask
            | MutationKind::DeleteTask
            | MutationKind::RescheduleTask => &Domain::ALL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MutationKind::CompleteTask => "complete",
            MutationKind::SnoozeTask => "snooze",
            MutationKind::DeleteTask => "delete",
            MutationKind::RescheduleTask => "reschedule",
        }
    }
}

/// Something that can mark a domain stale.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self, domain: Domain);
}

/// Invalidate every domain `kind` declares.
pub fn invalidate_for(target: &dyn Invalidate, kind: MutationKind) {
    for domain in kind.affected_domains() {
        target.invalidate(*domain);
    }
}

#[derive(Debug)]
struct DomainState {
    generation: u64,
    inflight: CancellationToken,
}

impl Default for DomainState {
    fn default() -> Self {
        DomainState { generation: 0, inflight: CancellationToken::new() }
    }
}

/// Shared invalidation coordinator.
#[derive(Debug)]
pub struct QueryCache {
    domains: Mutex<HashMap<Domain, DomainState>>,
    events: broadcast::Sender<Domain>,
}

impl Default for QueryCache {
    fn default() -> Self {
        QueryCache::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        QueryCache { domains: Mutex::new(HashMap::new()), events }
    }

    /// Number of invalidations `domain` has seen.
    pub fn generation(&self, domain: Domain) -> u64 {
        self.domains.lock().get(&domain).map_or(0, |s| s.generation)
    }

    /// Whether `domain` was invalidated since `seen` was read.
    pub fn is_stale(&self, domain: Domain, seen: u64) -> bool {
        self.generation(domain) != seen
    }

    /// Register a read of `domain`; the token fires if a mutation cancels it.
    pub fn begin_fetch(&self, domain: Domain) -> CancellationToken {
        self.domains.lock().entry(domain).or_default().inflight.child_token()
    }

    /// Cancel every read of `domain` currently in flight.
    pub fn cancel_inflight(&self, domain: Domain) {
        let mut domains = self.domains.lock();
        let state = domains.entry(domain).or_default();
        state.inflight.cancel();
        state.inflight = CancellationToken::new();
        debug!(?domain, "cancelled in-flight reads");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Domain> {
        self.events.subscribe()
    }
}

impl Invalidate for QueryCache {
    fn invalidate(&self, domain: Domain) {
        self.domains.lock().entry(domain).or_default().generation += 1;
        debug!(key = ?domain.key(), "invalidated");
        // No subscribers is fine.
        let _ = self.events.send(domain);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_task_mutation_invalidates_every_domain() {
        for kind in [
            MutationKind::CompleteTask,
            MutationKind::SnoozeTask,
            MutationKind::DeleteTask,
            MutationKind::RescheduleTask,
        ] {
            let cache = QueryCache::new();
            invalidate_for(&cache, kind);
            for domain in Domain::ALL {
                assert_eq!(cache.generation(domain), 1, "{kind:?} missed {domain:?}");
            }
        }
    }

    #[test]
    fn keys_are_stable() {
        assert_eq!(Domain::Tasks.key(), &["tasks"]);
        assert_eq!(Domain::Dashboard.key(), &["dashboard"]);
        assert_eq!(Domain::EntityTimelines.key(), &["entity_timeline"]);
    }

    #[test]
    fn cancel_only_hits_reads_started_before_it() {
        let cache = QueryCache::new();
        let before = cache.begin_fetch(Domain::Tasks);
        let other = cache.begin_fetch(Domain::Activities);
        cache.cancel_inflight(Domain::Tasks);
        let after = cache.begin_fetch(Domain::Tasks);
        assert!(before.is_cancelled());
        assert!(!other.is_cancelled());
        assert!(!after.is_cancelled());
    }

    #[tokio::test]
    async fn subscribers_hear_invalidations() {
        let cache = QueryCache::new();
        let mut rx = cache.subscribe();
        let seen = cache.generation(Domain::Dashboard);
        cache.invalidate(Domain::Dashboard);
        assert_eq!(rx.recv().await.unwrap(), Domain::Dashboard);
        assert!(cache.is_stale(Domain::Dashboard, seen));
    }
}
