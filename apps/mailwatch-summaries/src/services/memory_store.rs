//! In-memory store for service tests, with per-operation failure injection.
//!
//! Unlike Postgres it does not enforce one relation per label, so tests can
//! build the duplicated timelines older data may contain.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use mailwatch_db::models::{
    Domain, OwnershipAttributes, Summary, SummaryAggregate, SummaryEdge, TimelineEntry,
};
use mailwatch_db::{DomainStore, OwnershipTx, StoreError, SummaryStore};
use mailwatch_shared::{DateRange, SlotLabel};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    FindDomain,
    CountSlots,
    ListEdges,
    LoadAggregate,
    CreateSummary,
    RemoveSummary,
    CreateEdge,
    RemoveEdge,
    ListDomains,
    Lock,
    BeginOwnership,
    UpdateOwnership,
    CommitOwnership,
    Sweep,
}

impl Op {
    fn error(self) -> StoreError {
        let source = sqlx::Error::PoolTimedOut;
        match self {
            Op::FindDomain | Op::CountSlots | Op::ListEdges | Op::LoadAggregate | Op::ListDomains => {
                StoreError::Read { what: "memory store", source }
            }
            Op::BeginOwnership | Op::CommitOwnership => {
                StoreError::TransactionAbort { stage: "memory store", source }
            }
            _ => StoreError::Write { what: "memory store", source },
        }
    }
}

#[derive(Default)]
struct State {
    next_id: i64,
    domains: Vec<Domain>,
    aggregates: HashMap<(i64, NaiveDate), (i64, i64, i64)>,
    summaries: BTreeMap<i64, SummaryAggregate>,
    created_at: HashMap<i64, DateTime<Utc>>,
    edges: Vec<SummaryEdge>,
    locks: HashMap<String, (Uuid, DateTime<Utc>)>,
    // remaining successful calls before the op starts failing
    failures: HashMap<Op, usize>,
    calls: HashMap<Op, usize>,
    tx_log: Vec<&'static str>,
    delays: HashMap<Op, StdDuration>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&mut self, op: Op) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op) {
            Some(0) => Err(op.error()),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Its clock follows tokio time, so paused tests can move it forward.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    origin: Instant,
    epoch: DateTime<Utc>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            origin: Instant::now(),
            epoch: Utc::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(Instant::now() - self.origin).unwrap_or_else(|_| Duration::zero());
        self.epoch + elapsed
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_domain(&self, name: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.domains.push(Domain {
            id,
            domain: name.to_string(),
            owner_org: None,
            has_dmarc_report: false,
            ownership_updated_at: None,
        });
        id
    }

    pub fn domain(&self, id: i64) -> Domain {
        self.state()
            .domains
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .unwrap()
    }

    pub fn set_aggregate(&self, domain_id: i64, start: NaiveDate, pass: i64, fail: i64, total: i64) {
        self.state()
            .aggregates
            .insert((domain_id, start), (pass, fail, total));
    }

    pub fn fail_after(&self, op: Op, successes: usize) {
        self.state().failures.insert(op, successes);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every call of `op` sleeps for `delay` before touching any state.
    pub fn set_delay(&self, op: Op, delay: StdDuration) {
        self.state().delays.insert(op, delay);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    /// Sorted labels of the domain's relations, duplicates included.
    pub fn labels(&self, domain_id: i64) -> Vec<SlotLabel> {
        let mut labels: Vec<SlotLabel> = self
            .state()
            .edges
            .iter()
            .filter(|e| e.domain_id == domain_id)
            .map(|e| e.label)
            .collect();
        labels.sort();
        labels
    }

    pub fn summary_id_for(&self, domain_id: i64, label: &SlotLabel) -> Option<i64> {
        self.state()
            .edges
            .iter()
            .find(|e| e.domain_id == domain_id && e.label == *label)
            .map(|e| e.summary_id)
    }

    pub fn summary(&self, id: i64) -> Option<SummaryAggregate> {
        self.state().summaries.get(&id).copied()
    }

    pub fn has_summary(&self, id: i64) -> bool {
        self.state().summaries.contains_key(&id)
    }

    pub fn summary_count(&self) -> usize {
        self.state().summaries.len()
    }

    pub fn edge_count(&self) -> usize {
        self.state().edges.len()
    }

    /// Every summary has exactly one relation and every relation a summary.
    pub fn assert_no_orphans(&self) {
        let state = self.state();
        let mut links: HashMap<i64, usize> = HashMap::new();
        for edge in &state.edges {
            assert!(
                state.summaries.contains_key(&edge.summary_id),
                "relation {} points at missing summary {}",
                edge.label,
                edge.summary_id
            );
            *links.entry(edge.summary_id).or_default() += 1;
        }
        for id in state.summaries.keys() {
            assert_eq!(links.get(id).copied(), Some(1), "summary {} is not linked once", id);
        }
    }

    /// Adds a linked summary without going through the trait or its counters.
    pub fn insert_slot_raw(&self, domain_id: i64, label: SlotLabel) {
        let now = self.now();
        let mut state = self.state();
        let summary_id = state.next_id();
        let range = match label {
            SlotLabel::Month(start) => DateRange::month(start),
            SlotLabel::ThirtyDays => DateRange::thirty_days_ending(now.date_naive()),
        };
        state.summaries.insert(summary_id, SummaryAggregate::empty(range));
        state.created_at.insert(summary_id, now);
        let id = state.next_id();
        state.edges.push(SummaryEdge {
            id,
            domain_id,
            summary_id,
            label,
        });
    }

    pub fn remove_slot_raw(&self, domain_id: i64, label: &SlotLabel) {
        let mut state = self.state();
        let removed: Vec<i64> = state
            .edges
            .iter()
            .filter(|e| e.domain_id == domain_id && e.label == *label)
            .map(|e| e.summary_id)
            .collect();
        state
            .edges
            .retain(|e| !(e.domain_id == domain_id && e.label == *label));
        for id in removed {
            state.summaries.remove(&id);
            state.created_at.remove(&id);
        }
    }

    pub fn lock_owner(&self, domain: &str) -> Option<Uuid> {
        self.state().locks.get(domain).map(|(owner, _)| *owner)
    }

    pub fn hold_lock(&self, domain: &str, owner: Uuid, at: DateTime<Utc>) {
        self.state().locks.insert(domain.to_string(), (owner, at));
    }

    pub fn lock_count(&self) -> usize {
        self.state().locks.len()
    }

    pub fn tx_log(&self) -> Vec<&'static str> {
        self.state().tx_log.clone()
    }

    async fn pause(&self, op: Op) {
        let delay = self.state().delays.get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SummaryStore for MemoryStore {
    async fn find_domain(&self, domain: &str) -> Result<Option<Domain>, StoreError> {
        self.pause(Op::FindDomain).await;
        let mut state = self.state();
        state.check(Op::FindDomain)?;
        Ok(state.domains.iter().find(|d| d.domain == domain).cloned())
    }

    async fn count_slots(&self, domain_id: i64) -> Result<usize, StoreError> {
        let mut state = self.state();
        state.check(Op::CountSlots)?;
        Ok(state.edges.iter().filter(|e| e.domain_id == domain_id).count())
    }

    async fn current_slot_labels(&self, domain_id: i64) -> Result<Vec<NaiveDate>, StoreError> {
        let mut months: Vec<NaiveDate> = self
            .labels(domain_id)
            .into_iter()
            .filter_map(|label| label.as_month())
            .collect();
        months.dedup();
        Ok(months)
    }

    async fn list_summary_edges(&self, domain_id: i64) -> Result<Vec<SummaryEdge>, StoreError> {
        let mut state = self.state();
        state.check(Op::ListEdges)?;
        let mut edges: Vec<SummaryEdge> = state
            .edges
            .iter()
            .filter(|e| e.domain_id == domain_id)
            .cloned()
            .collect();
        edges.sort_by(|a, b| a.label.cmp(&b.label).then(a.id.cmp(&b.id)));
        Ok(edges)
    }

    async fn load_summary_by_date(
        &self,
        domain: &Domain,
        range: DateRange,
    ) -> Result<SummaryAggregate, StoreError> {
        let mut state = self.state();
        state.check(Op::LoadAggregate)?;
        let mut aggregate = SummaryAggregate::empty(range);
        if let Some((pass, fail, total)) = state.aggregates.get(&(domain.id, range.start)) {
            aggregate.pass = *pass;
            aggregate.fail = *fail;
            aggregate.total = *total;
        }
        Ok(aggregate)
    }

    async fn create_summary(&self, aggregate: &SummaryAggregate) -> Result<i64, StoreError> {
        self.pause(Op::CreateSummary).await;
        let now = self.now();
        let mut state = self.state();
        state.check(Op::CreateSummary)?;
        let id = state.next_id();
        state.summaries.insert(id, *aggregate);
        state.created_at.insert(id, now);
        Ok(id)
    }

    async fn remove_summary(&self, summary_id: i64) -> Result<(), StoreError> {
        self.pause(Op::RemoveSummary).await;
        let mut state = self.state();
        state.check(Op::RemoveSummary)?;
        state.summaries.remove(&summary_id);
        state.created_at.remove(&summary_id);
        Ok(())
    }

    async fn create_summary_edge(
        &self,
        domain_id: i64,
        summary_id: i64,
        label: &SlotLabel,
    ) -> Result<SummaryEdge, StoreError> {
        self.pause(Op::CreateEdge).await;
        let mut state = self.state();
        state.check(Op::CreateEdge)?;
        let edge = SummaryEdge {
            id: state.next_id(),
            domain_id,
            summary_id,
            label: *label,
        };
        state.edges.push(edge.clone());
        Ok(edge)
    }

    async fn remove_summary_edge(
        &self,
        domain_id: i64,
        label: &SlotLabel,
    ) -> Result<Option<SummaryEdge>, StoreError> {
        self.pause(Op::RemoveEdge).await;
        let mut state = self.state();
        state.check(Op::RemoveEdge)?;
        let position = state
            .edges
            .iter()
            .position(|e| e.domain_id == domain_id && e.label == *label);
        Ok(position.map(|i| state.edges.remove(i)))
    }

    async fn timeline(&self, domain_id: i64) -> Result<Vec<TimelineEntry>, StoreError> {
        let edges = self.list_summary_edges(domain_id).await?;
        let state = self.state();
        Ok(edges
            .into_iter()
            .filter_map(|edge| {
                let aggregate = state.summaries.get(&edge.summary_id)?;
                let created_at = state.created_at.get(&edge.summary_id).copied()?;
                Some(TimelineEntry {
                    label: edge.label,
                    summary: Summary {
                        id: edge.summary_id,
                        range_start: aggregate.range.start,
                        range_end: aggregate.range.end,
                        pass_count: aggregate.pass,
                        fail_count: aggregate.fail,
                        pass_dkim_only: aggregate.pass_dkim_only,
                        pass_spf_only: aggregate.pass_spf_only,
                        total_messages: aggregate.total,
                        created_at,
                    },
                })
            })
            .collect())
    }

    async fn sweep_unlinked_summaries(&self, min_age: Duration) -> Result<u64, StoreError> {
        let cutoff = self.now() - min_age;
        let mut state = self.state();
        state.check(Op::Sweep)?;
        let unlinked: Vec<i64> = state
            .summaries
            .keys()
            .copied()
            .filter(|id| !state.edges.iter().any(|e| e.summary_id == *id))
            .filter(|id| state.created_at.get(id).is_some_and(|at| *at < cutoff))
            .collect();
        for id in &unlinked {
            state.summaries.remove(id);
            state.created_at.remove(id);
        }
        Ok(unlinked.len() as u64)
    }
}

#[async_trait]
impl DomainStore for MemoryStore {
    async fn list_domain_names(&self) -> Result<Vec<String>, StoreError> {
        let mut state = self.state();
        state.check(Op::ListDomains)?;
        let mut names: Vec<String> = state.domains.iter().map(|d| d.domain.clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn try_lock_domain(
        &self,
        domain: &str,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = self.now();
        let mut state = self.state();
        state.check(Op::Lock)?;
        match state.locks.get(domain) {
            Some((holder, acquired_at)) if *holder != owner && *acquired_at >= now - ttl => {
                Ok(false)
            }
            _ => {
                state.locks.insert(domain.to_string(), (owner, now));
                Ok(true)
            }
        }
    }

    async fn release_domain_lock(&self, domain: &str, owner: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.locks.get(domain) {
            Some((holder, _)) if *holder == owner => {
                state.locks.remove(domain);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_ownership_update(&self) -> Result<Box<dyn OwnershipTx>, StoreError> {
        let mut state = self.state();
        state.check(Op::BeginOwnership)?;
        state.tx_log.push("begin");
        Ok(Box::new(MemoryTx {
            store: self.clone(),
            pending: Vec::new(),
        }))
    }
}

struct MemoryTx {
    store: MemoryStore,
    pending: Vec<(String, OwnershipAttributes, DateTime<Utc>)>,
}

#[async_trait]
impl OwnershipTx for MemoryTx {
    async fn update_ownership(
        &mut self,
        domain: &str,
        attrs: &OwnershipAttributes,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.store.state();
        state.tx_log.push("update");
        state.check(Op::UpdateOwnership)?;
        let exists = state.domains.iter().any(|d| d.domain == domain);
        if exists {
            self.pending
                .push((domain.to_string(), attrs.clone(), updated_at));
        }
        Ok(exists)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { store, pending } = *self;
        let mut state = store.state();
        state.tx_log.push("commit");
        state.check(Op::CommitOwnership)?;
        for (name, attrs, updated_at) in pending {
            if let Some(domain) = state.domains.iter_mut().find(|d| d.domain == name) {
                domain.owner_org = Some(attrs.owner_org);
                domain.has_dmarc_report = attrs.has_dmarc_report;
                domain.ownership_updated_at = Some(updated_at);
            }
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        self.store.state().tx_log.push("abort");
        Ok(())
    }
}
