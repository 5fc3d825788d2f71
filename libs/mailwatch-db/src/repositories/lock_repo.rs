use chrono::Duration;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

/// Advisory per-domain locks, one row per domain being maintained.
#[derive(Debug, Clone)]
pub struct LockRepository {
    pool: PgPool,
}

impl LockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Takes the lock if it is free, already ours, or its holder took it more
    /// than `ttl` ago. Acquisition time comes from the database clock.
    pub async fn try_acquire(
        &self,
        domain: &str,
        owner: Uuid,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let acquired: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO summary_locks (domain, owner, acquired_at)
            VALUES ($1, $2, CURRENT_TIMESTAMP)
            ON CONFLICT (domain) DO UPDATE SET
                owner = EXCLUDED.owner,
                acquired_at = EXCLUDED.acquired_at
            WHERE summary_locks.owner = EXCLUDED.owner
               OR summary_locks.acquired_at < CURRENT_TIMESTAMP - make_interval(secs => $3)
            RETURNING owner
            "#,
        )
        .bind(domain)
        .bind(owner)
        .bind(ttl.num_seconds() as f64)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::write("summary lock"))?;

        Ok(acquired == Some(owner))
    }

    pub async fn release(&self, domain: &str, owner: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM summary_locks WHERE domain = $1 AND owner = $2")
            .bind(domain)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(StoreError::write("summary lock"))?;

        let released = result.rows_affected() > 0;
        if !released {
            debug!("Lock on {} was no longer held by {}", domain, owner);
        }
        Ok(released)
    }
}
