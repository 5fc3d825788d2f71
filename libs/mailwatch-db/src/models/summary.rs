use chrono::{DateTime, NaiveDate, Utc};
use mailwatch_shared::{DateRange, SlotLabel};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::StoreError;

/// Pass/fail counts for one date range. Treated as opaque: whatever the
/// aggregate source reports is what gets stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryAggregate {
    pub range: DateRange,
    pub pass: i64,
    pub fail: i64,
    pub pass_dkim_only: i64,
    pub pass_spf_only: i64,
    pub total: i64,
}

impl SummaryAggregate {
    pub fn empty(range: DateRange) -> Self {
        Self {
            range,
            pass: 0,
            fail: 0,
            pass_dkim_only: 0,
            pass_spf_only: 0,
            total: 0,
        }
    }
}

/// Immutable stored summary. Superseded, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Summary {
    pub id: i64,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub pass_count: i64,
    pub fail_count: i64,
    pub pass_dkim_only: i64,
    pub pass_spf_only: i64,
    pub total_messages: i64,
    pub created_at: DateTime<Utc>,
}

/// Labelled link from a domain to one of its summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryEdge {
    pub id: i64,
    pub domain_id: i64,
    pub summary_id: i64,
    pub label: SlotLabel,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct SummaryEdgeRow {
    pub id: i64,
    pub domain_id: i64,
    pub summary_id: i64,
    pub label: String,
}

impl TryFrom<SummaryEdgeRow> for SummaryEdge {
    type Error = StoreError;

    fn try_from(row: SummaryEdgeRow) -> Result<Self, Self::Error> {
        let label = row
            .label
            .parse()
            .map_err(|_| StoreError::CorruptLabel { label: row.label.clone() })?;
        Ok(SummaryEdge {
            id: row.id,
            domain_id: row.domain_id,
            summary_id: row.summary_id,
            label,
        })
    }
}

/// One slot of a domain's timeline with its resolved summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub label: SlotLabel,
    pub summary: Summary,
}
