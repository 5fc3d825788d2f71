//! Store seams used by the maintenance services.
//!
//! Every call is a suspension point with no built-in deadline; callers that
//! need one wrap the call themselves.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use mailwatch_shared::{DateRange, SlotLabel};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Domain, OwnershipAttributes, SummaryAggregate, SummaryEdge, TimelineEntry};
use crate::repositories::{DomainRepository, LockRepository, OwnershipTransaction, SummaryRepository};

/// Summary records and the relations linking them to domains.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn find_domain(&self, domain: &str) -> Result<Option<Domain>, StoreError>;

    /// Number of relations (slots) currently linked to the domain.
    async fn count_slots(&self, domain_id: i64) -> Result<usize, StoreError>;

    /// Distinct monthly labels of the domain, oldest first. The thirty-day
    /// label is never included.
    async fn current_slot_labels(&self, domain_id: i64) -> Result<Vec<NaiveDate>, StoreError>;

    async fn list_summary_edges(&self, domain_id: i64) -> Result<Vec<SummaryEdge>, StoreError>;

    async fn load_summary_by_date(
        &self,
        domain: &Domain,
        range: DateRange,
    ) -> Result<SummaryAggregate, StoreError>;

    async fn create_summary(&self, aggregate: &SummaryAggregate) -> Result<i64, StoreError>;

    /// Only call with an id taken from a relation that was just removed.
    async fn remove_summary(&self, summary_id: i64) -> Result<(), StoreError>;

    async fn create_summary_edge(
        &self,
        domain_id: i64,
        summary_id: i64,
        label: &SlotLabel,
    ) -> Result<SummaryEdge, StoreError>;

    /// Removes the single relation with `label`, `None` when there is none.
    async fn remove_summary_edge(
        &self,
        domain_id: i64,
        label: &SlotLabel,
    ) -> Result<Option<SummaryEdge>, StoreError>;

    async fn timeline(&self, domain_id: i64) -> Result<Vec<TimelineEntry>, StoreError>;

    /// Deletes summaries older than `min_age` that no relation points at.
    /// Returns how many were removed.
    async fn sweep_unlinked_summaries(&self, min_age: Duration) -> Result<u64, StoreError>;
}

/// Domain-level operations: listing, advisory locks, ownership updates.
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn list_domain_names(&self) -> Result<Vec<String>, StoreError>;

    /// Stamped with the store's clock at the moment of acquisition. A lock
    /// older than `ttl` may be taken over; the holder may always re-take it.
    async fn try_lock_domain(
        &self,
        domain: &str,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn release_domain_lock(&self, domain: &str, owner: Uuid) -> Result<bool, StoreError>;

    async fn begin_ownership_update(&self) -> Result<Box<dyn OwnershipTx>, StoreError>;
}

/// A single open ownership transaction. Dropping it without `commit` rolls back.
#[async_trait]
pub trait OwnershipTx: Send {
    async fn update_ownership(
        &mut self,
        domain: &str,
        attrs: &OwnershipAttributes,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn abort(self: Box<Self>) -> Result<(), StoreError>;
}

/// Postgres-backed store over the repositories.
#[derive(Debug, Clone)]
pub struct PgStore {
    summaries: SummaryRepository,
    domains: DomainRepository,
    locks: LockRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            summaries: SummaryRepository::new(pool.clone()),
            domains: DomainRepository::new(pool.clone()),
            locks: LockRepository::new(pool),
        }
    }
}

#[async_trait]
impl SummaryStore for PgStore {
    async fn find_domain(&self, domain: &str) -> Result<Option<Domain>, StoreError> {
        self.domains.get_by_name(domain).await
    }

    async fn count_slots(&self, domain_id: i64) -> Result<usize, StoreError> {
        self.summaries.count_edges(domain_id).await
    }

    async fn current_slot_labels(&self, domain_id: i64) -> Result<Vec<NaiveDate>, StoreError> {
        self.summaries.month_labels(domain_id).await
    }

    async fn list_summary_edges(&self, domain_id: i64) -> Result<Vec<SummaryEdge>, StoreError> {
        self.summaries.list_edges(domain_id).await
    }

    async fn load_summary_by_date(
        &self,
        domain: &Domain,
        range: DateRange,
    ) -> Result<SummaryAggregate, StoreError> {
        self.summaries.load_aggregate(domain.id, range).await
    }

    async fn create_summary(&self, aggregate: &SummaryAggregate) -> Result<i64, StoreError> {
        self.summaries.create_summary(aggregate).await
    }

    async fn remove_summary(&self, summary_id: i64) -> Result<(), StoreError> {
        self.summaries.delete_summary(summary_id).await
    }

    async fn create_summary_edge(
        &self,
        domain_id: i64,
        summary_id: i64,
        label: &SlotLabel,
    ) -> Result<SummaryEdge, StoreError> {
        self.summaries.create_edge(domain_id, summary_id, label).await
    }

    async fn remove_summary_edge(
        &self,
        domain_id: i64,
        label: &SlotLabel,
    ) -> Result<Option<SummaryEdge>, StoreError> {
        self.summaries.delete_edge(domain_id, label).await
    }

    async fn timeline(&self, domain_id: i64) -> Result<Vec<TimelineEntry>, StoreError> {
        self.summaries.timeline(domain_id).await
    }

    async fn sweep_unlinked_summaries(&self, min_age: Duration) -> Result<u64, StoreError> {
        self.summaries.delete_unlinked_summaries(min_age).await
    }
}

#[async_trait]
impl DomainStore for PgStore {
    async fn list_domain_names(&self) -> Result<Vec<String>, StoreError> {
        self.domains.get_all_names().await
    }

    async fn try_lock_domain(
        &self,
        domain: &str,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.locks.try_acquire(domain, owner, ttl).await
    }

    async fn release_domain_lock(&self, domain: &str, owner: Uuid) -> Result<bool, StoreError> {
        self.locks.release(domain, owner).await
    }

    async fn begin_ownership_update(&self) -> Result<Box<dyn OwnershipTx>, StoreError> {
        let tx = self.domains.begin_ownership_update().await?;
        Ok(Box::new(tx))
    }
}

#[async_trait]
impl OwnershipTx for OwnershipTransaction {
    async fn update_ownership(
        &mut self,
        domain: &str,
        attrs: &OwnershipAttributes,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.update(domain, attrs, updated_at).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        OwnershipTransaction::commit(*self).await
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        self.rollback().await
    }
}
