//! Rolling DMARC summary window for a single domain.
//!
//! `create_summaries` is the per-domain entry point: a domain without the full
//! set of slots is (re)initialized, a warm domain has its monthly slots rolled
//! forward and its thirty-day slot refreshed. Callers must not run two of
//! these for the same domain at once; `MaintenanceService` holds a per-domain
//! lock around each call.

use std::collections::{BTreeMap, BTreeSet};
use std::iter;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use mailwatch_db::models::{Domain, SummaryEdge, TimelineEntry};
use mailwatch_db::{StoreError, SummaryStore};
use mailwatch_shared::{EXPECTED_SLOT_COUNT, SlotLabel, trailing_month_starts};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TimelineOutcome {
    UnknownDomain,
    Initialized { created: usize, removed: usize },
    Rolled { shifted: usize },
}

/// What a warm timeline needs to line up with the current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RollPlan {
    Aligned,
    /// `(date_to_remove, date_to_add)` pairs, oldest first.
    Shift(Vec<(NaiveDate, NaiveDate)>),
    Diverged,
}

pub(crate) fn plan_roll(edges: &[SummaryEdge], expected: &[NaiveDate]) -> RollPlan {
    let mut months = Vec::with_capacity(edges.len());
    let mut rolling = 0usize;
    for edge in edges {
        match edge.label {
            SlotLabel::Month(date) => months.push(date),
            SlotLabel::ThirtyDays => rolling += 1,
        }
    }

    let current: BTreeSet<NaiveDate> = months.iter().copied().collect();
    if rolling != 1 || current.len() != months.len() || current.len() != expected.len() {
        return RollPlan::Diverged;
    }

    let wanted: BTreeSet<NaiveDate> = expected.iter().copied().collect();
    let stale: Vec<NaiveDate> = current.difference(&wanted).copied().collect();
    let missing: Vec<NaiveDate> = wanted.difference(&current).copied().collect();

    if stale.is_empty() {
        return RollPlan::Aligned;
    }

    // Forward rolling only ever leaves stale months behind the window.
    let Some(window_start) = wanted.first() else {
        return RollPlan::Diverged;
    };
    if stale.iter().any(|date| date >= window_start) {
        return RollPlan::Diverged;
    }

    RollPlan::Shift(stale.into_iter().zip(missing).collect())
}

pub(crate) fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_lowercase()
}

/// Diagnostic view of a domain's timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineReport {
    pub domain: String,
    pub slot_count: usize,
    pub expected_slot_count: usize,
    pub represented_months: Vec<NaiveDate>,
    pub missing_months: Vec<NaiveDate>,
    pub entries: Vec<TimelineEntry>,
}

#[derive(Clone)]
pub struct TimelineService {
    store: Arc<dyn SummaryStore>,
}

impl TimelineService {
    pub fn new(store: Arc<dyn SummaryStore>) -> Self {
        Self { store }
    }

    pub async fn create_summaries(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<TimelineOutcome, StoreError> {
        let name = normalize_domain(domain);
        let Some(domain) = self.store.find_domain(&name).await? else {
            debug!("Domain {} is not tracked, skipping summaries", name);
            return Ok(TimelineOutcome::UnknownDomain);
        };

        let months = trailing_month_starts(now);
        let slot_count = self.store.count_slots(domain.id).await?;
        if slot_count != EXPECTED_SLOT_COUNT {
            info!(
                "Domain {} has {} of {} summary slots, initializing",
                domain.domain, slot_count, EXPECTED_SLOT_COUNT
            );
            return self.initialize_summaries(&domain, &months, now).await;
        }

        let edges = self.store.list_summary_edges(domain.id).await?;
        let shifted = match plan_roll(&edges, &months) {
            RollPlan::Aligned => 0,
            RollPlan::Shift(pairs) => {
                let mut shifted = 0;
                for (date_to_remove, date_to_add) in pairs {
                    if self
                        .update_month_summary(&domain, date_to_remove, date_to_add, now)
                        .await?
                    {
                        shifted += 1;
                    }
                }
                shifted
            }
            RollPlan::Diverged => {
                warn!(
                    "Summary slots of {} do not match the expected window, reinitializing",
                    domain.domain
                );
                return self.initialize_summaries(&domain, &months, now).await;
            }
        };

        self.update_thirty_days(&domain, now).await?;
        Ok(TimelineOutcome::Rolled { shifted })
    }

    /// Brings the domain to exactly one slot per expected label.
    ///
    /// Expected months already present exactly once are kept. Everything else
    /// (stale months, duplicated labels, the thirty-day slot) is evicted and the
    /// gaps are filled, months oldest first, thirty-day slot last. Safe to rerun
    /// after an interrupted run.
    pub async fn initialize_summaries(
        &self,
        domain: &Domain,
        months: &[NaiveDate],
        now: DateTime<Utc>,
    ) -> Result<TimelineOutcome, StoreError> {
        let expected: BTreeSet<SlotLabel> = months.iter().map(|m| SlotLabel::Month(*m)).collect();

        let mut occurrences: BTreeMap<SlotLabel, usize> = BTreeMap::new();
        for edge in self.store.list_summary_edges(domain.id).await? {
            *occurrences.entry(edge.label).or_default() += 1;
        }

        let keep: BTreeSet<SlotLabel> = occurrences
            .iter()
            .filter(|(label, count)| **count == 1 && expected.contains(*label))
            .map(|(label, _)| *label)
            .collect();

        let mut removed = 0;
        for (label, count) in &occurrences {
            if keep.contains(label) {
                continue;
            }
            for _ in 0..*count {
                if self.evict_slot(domain, label).await?.is_some() {
                    removed += 1;
                }
            }
        }

        let mut created = 0;
        let targets = expected.iter().copied().chain(iter::once(SlotLabel::ThirtyDays));
        for label in targets {
            if keep.contains(&label) {
                continue;
            }
            self.fill_slot(domain, label, now).await?;
            created += 1;
        }

        info!(
            "Initialized summaries for {}: {} created, {} removed, {} kept",
            domain.domain,
            created,
            removed,
            keep.len()
        );
        Ok(TimelineOutcome::Initialized { created, removed })
    }

    /// Evicts the `date_to_remove` month and fills `date_to_add`.
    ///
    /// Returns `false` without touching anything when no slot carries
    /// `date_to_remove`, which is what a second run in the same period sees.
    pub async fn update_month_summary(
        &self,
        domain: &Domain,
        date_to_remove: NaiveDate,
        date_to_add: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let Some(edge) = self
            .store
            .remove_summary_edge(domain.id, &SlotLabel::Month(date_to_remove))
            .await?
        else {
            debug!(
                "No {} slot for {}, nothing to roll",
                date_to_remove, domain.domain
            );
            return Ok(false);
        };
        self.store.remove_summary(edge.summary_id).await?;

        self.fill_slot(domain, SlotLabel::Month(date_to_add), now).await?;
        info!(
            "Rolled summaries for {}: {} -> {}",
            domain.domain, date_to_remove, date_to_add
        );
        Ok(true)
    }

    /// Replaces the thirty-day slot with one ending at `now`. Returns the new
    /// summary id.
    pub async fn update_thirty_days(
        &self,
        domain: &Domain,
        now: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.evict_slot(domain, &SlotLabel::ThirtyDays).await?;
        let edge = self.fill_slot(domain, SlotLabel::ThirtyDays, now).await?;
        Ok(edge.summary_id)
    }

    pub async fn inspect(
        &self,
        domain: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<TimelineReport>, StoreError> {
        let name = normalize_domain(domain);
        let Some(domain) = self.store.find_domain(&name).await? else {
            return Ok(None);
        };

        let slot_count = self.store.count_slots(domain.id).await?;
        let represented_months = self.store.current_slot_labels(domain.id).await?;
        let present: BTreeSet<NaiveDate> = represented_months.iter().copied().collect();
        let missing_months = trailing_month_starts(now)
            .into_iter()
            .filter(|month| !present.contains(month))
            .collect();
        let entries = self.store.timeline(domain.id).await?;

        Ok(Some(TimelineReport {
            domain: domain.domain,
            slot_count,
            expected_slot_count: EXPECTED_SLOT_COUNT,
            represented_months,
            missing_months,
            entries,
        }))
    }

    /// Deletes summaries older than `min_age` that lost or never got their
    /// relation, which happens when a run is cancelled between the two writes.
    /// `min_age` must exceed the longest a run can take.
    pub async fn sweep_unlinked_summaries(&self, min_age: Duration) -> Result<u64, StoreError> {
        let removed = self.store.sweep_unlinked_summaries(min_age).await?;
        if removed > 0 {
            info!("Removed {} unlinked summaries", removed);
        }
        Ok(removed)
    }

    /// Removes the relation with `label` and then its summary.
    async fn evict_slot(
        &self,
        domain: &Domain,
        label: &SlotLabel,
    ) -> Result<Option<i64>, StoreError> {
        let Some(edge) = self.store.remove_summary_edge(domain.id, label).await? else {
            return Ok(None);
        };
        self.store.remove_summary(edge.summary_id).await?;
        Ok(Some(edge.summary_id))
    }

    async fn fill_slot(
        &self,
        domain: &Domain,
        label: SlotLabel,
        now: DateTime<Utc>,
    ) -> Result<SummaryEdge, StoreError> {
        let aggregate = self
            .store
            .load_summary_by_date(domain, label.range(now))
            .await?;
        let summary_id = self.store.create_summary(&aggregate).await?;

        match self
            .store
            .create_summary_edge(domain.id, summary_id, &label)
            .await
        {
            Ok(edge) => {
                debug!(
                    "Filled {} slot for {} with summary {} ({} messages)",
                    label, domain.domain, summary_id, aggregate.total
                );
                Ok(edge)
            }
            Err(err) => {
                // Unlinked summaries are unreachable.
                if let Err(cleanup) = self.store.remove_summary(summary_id).await {
                    warn!(
                        "Summary {} for {} left unlinked: {}",
                        summary_id, domain.domain, cleanup
                    );
                }
                Err(err)
            }
        }
    }
}
