mod config;
mod services;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mailwatch_db::models::OwnershipAttributes;
use mailwatch_db::{PgStore, init_db};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use config::Settings;
use services::maintenance::MaintenanceService;
use services::ownership_service::OwnershipService;
use services::timeline_service::TimelineService;

const DEFAULT_LOG_FILTER: &str = "mailwatch_summaries=info,mailwatch_db=info,sqlx=warn";

#[derive(Parser)]
#[command(name = "mailwatch-summaries")]
#[command(about = "Rolling DMARC summary maintenance", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one maintenance batch and exit
    Run {
        /// Limit the batch to these domains (repeatable)
        #[arg(long = "domain")]
        domains: Vec<String>,
    },
    /// Run maintenance batches on a fixed interval
    Serve,
    /// Print a domain's summary timeline as JSON
    Inspect {
        #[arg(long)]
        domain: String,
    },
    /// Record which organization owns a domain
    Ownership {
        #[arg(long)]
        domain: String,
        #[arg(long)]
        org: String,
        #[arg(long)]
        has_dmarc_report: bool,
        /// Fail instead of only logging when the update does not land
        #[arg(long)]
        strict: bool,
    },
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "mailwatch-summaries.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(fmt::layer().with_writer(io::stdout))
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let _guard = init_tracing(cli.settings.log_dir.as_deref());
    if let Err(e) = dotenv {
        debug!("No .env file loaded: {}", e);
    }

    let pool = init_db(&cli.settings.db_config()).await?;
    let store = Arc::new(PgStore::new(pool));
    let timeline = TimelineService::new(store.clone());

    match cli.command {
        Commands::Run { domains } => {
            let config = cli.settings.maintenance_config()?;
            let maintenance = MaintenanceService::new(store, timeline, config);
            let report = maintenance.run_batch(Utc::now(), &domains).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.failed.is_empty() {
                anyhow::bail!("{} domain(s) failed: {}", report.failed.len(), report.failed.join(", "));
            }
        }
        Commands::Serve => {
            let config = cli.settings.maintenance_config()?;
            let maintenance = MaintenanceService::new(store, timeline, config);
            tokio::select! {
                _ = maintenance.start() => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Failed to listen for shutdown signal")?;
                    info!("Shutting down summary maintenance");
                }
            }
        }
        Commands::Inspect { domain } => {
            let report = timeline
                .inspect(&domain, Utc::now())
                .await?
                .with_context(|| format!("Domain {} is not tracked", domain))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Ownership {
            domain,
            org,
            has_dmarc_report,
            strict,
        } => {
            let ownership = OwnershipService::new(store);
            let attrs = OwnershipAttributes {
                owner_org: org,
                has_dmarc_report,
            };
            if strict {
                let updated = ownership
                    .try_update_ownership(&domain, &attrs, Utc::now())
                    .await
                    .context("Ownership update failed")?;
                if !updated {
                    anyhow::bail!("Domain {} is not tracked", domain);
                }
            } else {
                ownership.update_ownership(&domain, &attrs, Utc::now()).await;
            }
        }
    }

    Ok(())
}
