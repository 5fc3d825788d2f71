use chrono::{Duration, NaiveDate};
use mailwatch_shared::{DateRange, SlotLabel, THIRTY_DAYS_LABEL};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::StoreError;
use crate::models::summary::SummaryEdgeRow;
use crate::models::{Summary, SummaryAggregate, SummaryEdge, TimelineEntry};

#[derive(Debug, Clone)]
pub struct SummaryRepository {
    pool: PgPool,
}

impl SummaryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== RELATIONS ====================

    pub async fn count_edges(&self, domain_id: i64) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM domains_to_dmarc_summaries WHERE domain_id = $1",
        )
        .bind(domain_id)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::read("summary slot count"))?;

        Ok(count.max(0) as usize)
    }

    /// Distinct monthly labels linked to the domain, oldest first.
    pub async fn month_labels(&self, domain_id: i64) -> Result<Vec<NaiveDate>, StoreError> {
        // ISO dates sort chronologically as text.
        let labels: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT label FROM domains_to_dmarc_summaries
            WHERE domain_id = $1 AND label <> $2
            ORDER BY label ASC
            "#,
        )
        .bind(domain_id)
        .bind(THIRTY_DAYS_LABEL)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::read("summary slot labels"))?;

        labels
            .into_iter()
            .map(|raw| match raw.parse::<SlotLabel>() {
                Ok(SlotLabel::Month(date)) => Ok(date),
                _ => Err(StoreError::CorruptLabel { label: raw }),
            })
            .collect()
    }

    pub async fn list_edges(&self, domain_id: i64) -> Result<Vec<SummaryEdge>, StoreError> {
        let rows = sqlx::query_as::<_, SummaryEdgeRow>(
            r#"
            SELECT id, domain_id, summary_id, label
            FROM domains_to_dmarc_summaries
            WHERE domain_id = $1
            ORDER BY label ASC, id ASC
            "#,
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::read("summary relations"))?;

        rows.into_iter().map(SummaryEdge::try_from).collect()
    }

    pub async fn create_edge(
        &self,
        domain_id: i64,
        summary_id: i64,
        label: &SlotLabel,
    ) -> Result<SummaryEdge, StoreError> {
        let row = sqlx::query_as::<_, SummaryEdgeRow>(
            r#"
            INSERT INTO domains_to_dmarc_summaries (domain_id, summary_id, label, created_at)
            VALUES ($1, $2, $3, CURRENT_TIMESTAMP)
            RETURNING id, domain_id, summary_id, label
            "#,
        )
        .bind(domain_id)
        .bind(summary_id)
        .bind(label.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::write("summary relation"))?;

        SummaryEdge::try_from(row)
    }

    /// Deletes one relation carrying `label` and returns it.
    pub async fn delete_edge(
        &self,
        domain_id: i64,
        label: &SlotLabel,
    ) -> Result<Option<SummaryEdge>, StoreError> {
        let row = sqlx::query_as::<_, SummaryEdgeRow>(
            r#"
            DELETE FROM domains_to_dmarc_summaries
            WHERE id = (
                SELECT id FROM domains_to_dmarc_summaries
                WHERE domain_id = $1 AND label = $2
                ORDER BY id ASC
                LIMIT 1
            )
            RETURNING id, domain_id, summary_id, label
            "#,
        )
        .bind(domain_id)
        .bind(label.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::write("summary relation"))?;

        row.map(SummaryEdge::try_from).transpose()
    }

    // ==================== SUMMARIES ====================

    /// Category totals over the raw report rows of `range`.
    pub async fn load_aggregate(
        &self,
        domain_id: i64,
        range: DateRange,
    ) -> Result<SummaryAggregate, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(message_count) FILTER (WHERE spf_aligned AND dkim_aligned), 0)::BIGINT AS pass,
                COALESCE(SUM(message_count) FILTER (WHERE NOT spf_aligned AND NOT dkim_aligned), 0)::BIGINT AS fail,
                COALESCE(SUM(message_count) FILTER (WHERE dkim_aligned AND NOT spf_aligned), 0)::BIGINT AS pass_dkim_only,
                COALESCE(SUM(message_count) FILTER (WHERE spf_aligned AND NOT dkim_aligned), 0)::BIGINT AS pass_spf_only,
                COALESCE(SUM(message_count), 0)::BIGINT AS total
            FROM dmarc_report_records
            WHERE domain_id = $1 AND report_date >= $2 AND report_date < $3
            "#,
        )
        .bind(domain_id)
        .bind(range.start)
        .bind(range.end)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::read("dmarc report aggregate"))?;

        Self::row_to_aggregate(&row, range).map_err(StoreError::read("dmarc report aggregate"))
    }

    fn row_to_aggregate(row: &PgRow, range: DateRange) -> Result<SummaryAggregate, sqlx::Error> {
        Ok(SummaryAggregate {
            range,
            pass: row.try_get("pass")?,
            fail: row.try_get("fail")?,
            pass_dkim_only: row.try_get("pass_dkim_only")?,
            pass_spf_only: row.try_get("pass_spf_only")?,
            total: row.try_get("total")?,
        })
    }

    pub async fn create_summary(&self, aggregate: &SummaryAggregate) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO dmarc_summaries (
                range_start, range_end, pass_count, fail_count,
                pass_dkim_only, pass_spf_only, total_messages, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, CURRENT_TIMESTAMP)
            RETURNING id
            "#,
        )
        .bind(aggregate.range.start)
        .bind(aggregate.range.end)
        .bind(aggregate.pass)
        .bind(aggregate.fail)
        .bind(aggregate.pass_dkim_only)
        .bind(aggregate.pass_spf_only)
        .bind(aggregate.total)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::write("dmarc summary"))
    }

    pub async fn delete_summary(&self, summary_id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM dmarc_summaries WHERE id = $1")
            .bind(summary_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::write("dmarc summary"))?;
        Ok(())
    }

    /// Deletes summaries older than `min_age` that no relation points at.
    pub async fn delete_unlinked_summaries(&self, min_age: Duration) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM dmarc_summaries s
            WHERE s.created_at < CURRENT_TIMESTAMP - make_interval(secs => $1)
              AND NOT EXISTS (
                  SELECT 1 FROM domains_to_dmarc_summaries e
                  WHERE e.summary_id = s.id
              )
            "#,
        )
        .bind(min_age.num_seconds() as f64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::write("unlinked dmarc summaries"))?;

        Ok(result.rows_affected())
    }

    pub async fn timeline(&self, domain_id: i64) -> Result<Vec<TimelineEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.label, s.id, s.range_start, s.range_end, s.pass_count, s.fail_count,
                   s.pass_dkim_only, s.pass_spf_only, s.total_messages, s.created_at
            FROM domains_to_dmarc_summaries e
            JOIN dmarc_summaries s ON s.id = e.summary_id
            WHERE e.domain_id = $1
            ORDER BY e.label ASC
            "#,
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::read("summary timeline"))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row
                .try_get("label")
                .map_err(StoreError::read("summary timeline"))?;
            let label = raw
                .parse()
                .map_err(|_| StoreError::CorruptLabel { label: raw.clone() })?;
            let summary = Self::row_to_summary(row).map_err(StoreError::read("summary timeline"))?;
            entries.push(TimelineEntry { label, summary });
        }
        // Where "thirtyDays" lands in SQL text order depends on collation.
        entries.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(entries)
    }

    fn row_to_summary(row: &PgRow) -> Result<Summary, sqlx::Error> {
        Ok(Summary {
            id: row.try_get("id")?,
            range_start: row.try_get("range_start")?,
            range_end: row.try_get("range_end")?,
            pass_count: row.try_get("pass_count")?,
            fail_count: row.try_get("fail_count")?,
            pass_dkim_only: row.try_get("pass_dkim_only")?,
            pass_spf_only: row.try_get("pass_spf_only")?,
            total_messages: row.try_get("total_messages")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
