use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use mailwatch_db::DbConfig;
use thiserror::Error;

use crate::services::maintenance::MaintenanceConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error(
        "SUMMARY_LOCK_TTL_SECS ({lock_ttl_secs}) must be longer than \
         SUMMARY_DOMAIN_TIMEOUT_SECS ({domain_timeout_secs})"
    )]
    LockTtlTooShort {
        lock_ttl_secs: u64,
        domain_timeout_secs: u64,
    },
}

/// Process-wide settings, from flags or the environment (`.env` included).
#[derive(Debug, Clone, Args)]
pub struct Settings {
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,

    /// Domains processed concurrently
    #[arg(long, env = "SUMMARY_WORKERS", default_value_t = 4)]
    pub workers: usize,

    #[arg(long, env = "SUMMARY_LOCK_TTL_SECS", default_value_t = 3600)]
    pub lock_ttl_secs: u64,

    #[arg(long, env = "SUMMARY_DOMAIN_TIMEOUT_SECS", default_value_t = 300)]
    pub domain_timeout_secs: u64,

    #[arg(long, env = "SUMMARY_INTERVAL_SECS", default_value_t = 86_400)]
    pub interval_secs: u64,

    /// Also write logs to this directory
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    pub fn db_config(&self) -> DbConfig {
        DbConfig {
            url: self.database_url.clone(),
            max_connections: self.db_max_connections,
        }
    }

    pub fn maintenance_config(&self) -> Result<MaintenanceConfig, ConfigError> {
        for (name, value) in [
            ("SUMMARY_WORKERS", self.workers as u64),
            ("SUMMARY_LOCK_TTL_SECS", self.lock_ttl_secs),
            ("SUMMARY_DOMAIN_TIMEOUT_SECS", self.domain_timeout_secs),
            ("SUMMARY_INTERVAL_SECS", self.interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        // A lock must never lapse while its holder can still be running.
        if self.lock_ttl_secs <= self.domain_timeout_secs {
            return Err(ConfigError::LockTtlTooShort {
                lock_ttl_secs: self.lock_ttl_secs,
                domain_timeout_secs: self.domain_timeout_secs,
            });
        }

        let lock_ttl = i64::try_from(self.lock_ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX);

        Ok(MaintenanceConfig {
            workers: self.workers,
            lock_ttl,
            domain_timeout: Duration::from_secs(self.domain_timeout_secs),
            interval: Duration::from_secs(self.interval_secs),
        })
    }
}
