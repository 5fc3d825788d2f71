use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::info;

/// Connection settings, handed in by the binary at startup.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must start with postgres:// or postgresql://"
            ));
        }
        if self.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be at least 1"));
        }
        Ok(())
    }
}

pub async fn init_db(config: &DbConfig) -> Result<PgPool> {
    config.validate()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database ready ({} connections max)", config.max_connections);

    Ok(pool)
}
