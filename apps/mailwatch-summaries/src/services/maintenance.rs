use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use mailwatch_db::{DomainStore, StoreError};
use serde::Serialize;
use tokio::time::{interval, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::timeline_service::{TimelineOutcome, TimelineService, normalize_domain};

#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Domains processed concurrently; each domain only ever has one worker.
    pub workers: usize,
    /// Age after which another worker's lock counts as abandoned. Must
    /// exceed `domain_timeout` so a lock cannot lapse during its run.
    pub lock_ttl: chrono::Duration,
    pub domain_timeout: Duration,
    pub interval: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lock_ttl: chrono::Duration::hours(1),
            domain_timeout: Duration::from_secs(300),
            interval: Duration::from_secs(86_400),
        }
    }
}

/// Domains of one batch, grouped by how their run ended.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub initialized: Vec<String>,
    pub rolled: Vec<String>,
    pub unknown: Vec<String>,
    pub locked: Vec<String>,
    pub failed: Vec<String>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.initialized.len() + self.rolled.len()
    }

    fn record(&mut self, domain: String, run: DomainRun) {
        match run {
            DomainRun::Done(TimelineOutcome::Initialized { .. }) => self.initialized.push(domain),
            DomainRun::Done(TimelineOutcome::Rolled { .. }) => self.rolled.push(domain),
            DomainRun::Done(TimelineOutcome::UnknownDomain) => self.unknown.push(domain),
            DomainRun::Locked => self.locked.push(domain),
            DomainRun::Failed => self.failed.push(domain),
        }
    }

    fn sort(&mut self) {
        for names in [
            &mut self.initialized,
            &mut self.rolled,
            &mut self.unknown,
            &mut self.locked,
            &mut self.failed,
        ] {
            names.sort();
        }
    }
}

enum DomainRun {
    Done(TimelineOutcome),
    Locked,
    Failed,
}

/// Periodic driver for `TimelineService` across all domains.
pub struct MaintenanceService {
    domains: Arc<dyn DomainStore>,
    timeline: TimelineService,
    config: MaintenanceConfig,
    worker_id: Uuid,
}

impl MaintenanceService {
    pub fn new(
        domains: Arc<dyn DomainStore>,
        timeline: TimelineService,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            domains,
            timeline,
            config,
            worker_id: Uuid::new_v4(),
        }
    }

    pub async fn start(&self) {
        info!(
            "Starting summary maintenance (every {}s, {} workers)",
            self.config.interval.as_secs(),
            self.config.workers
        );
        let mut interval = interval(self.config.interval);

        loop {
            interval.tick().await;
            if let Err(e) = self.run_batch(Utc::now(), &[]).await {
                error!("Summary maintenance error: {}", e);
            }
        }
    }

    /// Runs every domain once, or only `only` when it is not empty.
    ///
    /// Only listing the domains can fail the batch; per-domain failures are
    /// logged and reported.
    pub async fn run_batch(
        &self,
        now: DateTime<Utc>,
        only: &[String],
    ) -> Result<BatchReport, StoreError> {
        let names = if only.is_empty() {
            self.domains.list_domain_names().await?
        } else {
            only.to_vec()
        };
        let names: BTreeSet<String> = names
            .iter()
            .map(|name| normalize_domain(name))
            .filter(|name| !name.is_empty())
            .collect();

        // Anything unlinked and older than a lock is left over from a cancelled run.
        if let Err(e) = self
            .timeline
            .sweep_unlinked_summaries(self.config.lock_ttl)
            .await
        {
            warn!("Could not sweep unlinked summaries: {}", e);
        }

        let runs: Vec<(String, DomainRun)> = stream::iter(names)
            .map(|name| async move {
                let run = self.run_domain(&name, now).await;
                (name, run)
            })
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        let mut report = BatchReport::default();
        for (name, run) in runs {
            report.record(name, run);
        }
        report.sort();

        info!(
            "Summary batch done: {} initialized, {} rolled, {} unknown, {} locked, {} failed",
            report.initialized.len(),
            report.rolled.len(),
            report.unknown.len(),
            report.locked.len(),
            report.failed.len()
        );
        Ok(report)
    }

    async fn run_domain(&self, domain: &str, now: DateTime<Utc>) -> DomainRun {
        match self
            .domains
            .try_lock_domain(domain, self.worker_id, self.config.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!("Domain {} is locked by another worker, skipping", domain);
                return DomainRun::Locked;
            }
            Err(e) => {
                error!("Could not lock domain {}: {}", domain, e);
                return DomainRun::Failed;
            }
        }

        let result = timeout(
            self.config.domain_timeout,
            self.timeline.create_summaries(domain, now),
        )
        .await;

        if let Err(e) = self.domains.release_domain_lock(domain, self.worker_id).await {
            warn!("Could not release lock on {}: {}", domain, e);
        }

        match result {
            Ok(Ok(outcome)) => DomainRun::Done(outcome),
            Ok(Err(e)) => {
                error!("Summaries for {} failed: {}", domain, e);
                DomainRun::Failed
            }
            Err(_) => {
                error!(
                    "Summaries for {} timed out after {}s",
                    domain,
                    self.config.domain_timeout.as_secs()
                );
                DomainRun::Failed
            }
        }
    }
}
