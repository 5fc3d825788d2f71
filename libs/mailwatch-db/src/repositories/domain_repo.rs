use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::StoreError;
use crate::models::{Domain, OwnershipAttributes};

#[derive(Debug, Clone)]
pub struct DomainRepository {
    pool: PgPool,
}

impl DomainRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_name(&self, domain: &str) -> Result<Option<Domain>, StoreError> {
        sqlx::query_as::<_, Domain>(
            r#"
            SELECT id, domain, owner_org, has_dmarc_report, ownership_updated_at
            FROM domains
            WHERE domain = $1
            "#,
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::read("domain"))
    }

    pub async fn get_all_names(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar("SELECT domain FROM domains ORDER BY domain ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::read("domain list"))
    }

    pub async fn begin_ownership_update(&self) -> Result<OwnershipTransaction, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(StoreError::abort("begin"))?;
        Ok(OwnershipTransaction { tx })
    }
}

/// Open transaction over the domain ownership columns.
pub struct OwnershipTransaction {
    tx: Transaction<'static, Postgres>,
}

impl OwnershipTransaction {
    /// Returns `false` when no domain with that name exists.
    pub async fn update(
        &mut self,
        domain: &str,
        attrs: &OwnershipAttributes,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE domains
            SET owner_org = $1, has_dmarc_report = $2, ownership_updated_at = $3
            WHERE domain = $4
            "#,
        )
        .bind(&attrs.owner_org)
        .bind(attrs.has_dmarc_report)
        .bind(updated_at)
        .bind(domain)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::write("domain ownership"))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::abort("commit"))
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::abort("rollback"))
    }
}
