use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailwatch_db::models::OwnershipAttributes;
use mailwatch_db::{DomainStore, StoreError};
use tracing::{error, info, warn};

use super::timeline_service::normalize_domain;

/// Writes ownership attributes onto a domain, one transaction per call.
#[derive(Clone)]
pub struct OwnershipService {
    domains: Arc<dyn DomainStore>,
}

impl OwnershipService {
    pub fn new(domains: Arc<dyn DomainStore>) -> Self {
        Self { domains }
    }

    /// `Ok(false)` when no domain matched; the transaction still commits.
    pub async fn try_update_ownership(
        &self,
        domain: &str,
        attrs: &OwnershipAttributes,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let name = normalize_domain(domain);
        let mut tx = self.domains.begin_ownership_update().await?;

        let updated = match tx.update_ownership(&name, attrs, now).await {
            Ok(updated) => updated,
            Err(err) => {
                if let Err(rollback) = tx.abort().await {
                    warn!("Rollback of ownership update for {} failed: {}", name, rollback);
                }
                return Err(err);
            }
        };

        // A failed commit drops the transaction, which rolls it back.
        tx.commit().await?;

        if updated {
            info!(
                "Ownership of {} set to {} (dmarc report: {})",
                name, attrs.owner_org, attrs.has_dmarc_report
            );
        } else {
            warn!("Ownership update matched no domain named {}", name);
        }
        Ok(updated)
    }

    /// Same as `try_update_ownership`, but failures are only logged.
    pub async fn update_ownership(
        &self,
        domain: &str,
        attrs: &OwnershipAttributes,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.try_update_ownership(domain, attrs, now).await {
            error!("Ownership update for {} failed: {}", domain, e);
        }
    }
}
