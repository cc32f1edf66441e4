//! mdr_admin: operator commands for the metadata registry.
//!
//! Usage:
//!   mdr_admin migrate
//!   mdr_admin recache-authority <AUTHORITY_ID>...
//!   mdr_admin recache-workgroup <WORKGROUP_ID>...
//!   mdr_admin drain-events --max 100
//!
//! Reads DATABASE_URL (or `--database-url`), optionally from `.env`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mdr_core::types::{AuthorityId, ItemId, RecacheReport, WorkgroupId};
use mdr_core::{RegistryConfig, RegistryError, RegistryService};
use mdr_postgres::{migrate, DatabaseConfig, PgRegistryStore};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mdr_admin")]
#[command(about = "Metadata registry maintenance jobs")]
struct Args {
    /// Postgres connection string; DATABASE_URL and DATABASE_POOL_SIZE otherwise
    #[arg(long)]
    database_url: Option<String>,

    /// YAML registry config; MDR_* environment variables otherwise
    #[arg(short = 'c', long, env = "MDR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the registry schema if missing
    Migrate,
    /// Recompute cached visibility for every item an authority has registered
    RecacheAuthority {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Recompute cached visibility for every item in a workgroup
    RecacheWorkgroup {
        #[arg(required = true)]
        ids: Vec<Uuid>,
    },
    /// Print and remove pending outbox events as JSON lines
    DrainEvents {
        #[arg(long, default_value = "100")]
        max: usize,
    },
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Authority(AuthorityId),
    Workgroup(WorkgroupId),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Authority(id) => write!(f, "authority {id}"),
            Target::Workgroup(id) => write!(f, "workgroup {id}"),
        }
    }
}

/// Outcome of a batch of recache jobs.
#[derive(Debug, Default)]
struct BatchSummary {
    scanned: usize,
    changed: usize,
    missing: Vec<String>,
    failed: Vec<(ItemId, String)>,
}

impl BatchSummary {
    fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.failed.is_empty()
    }
}

/// Run one recache job per target. A missing target or an item that fails
/// to recache is recorded and the batch carries on; any other failure
/// stops it.
async fn recache_targets(
    service: &RegistryService,
    targets: &[Target],
) -> Result<BatchSummary, RegistryError> {
    let mut summary = BatchSummary::default();
    for target in targets {
        let result: Result<RecacheReport, RegistryError> = match target {
            Target::Authority(id) => service.recache_authority(*id).await,
            Target::Workgroup(id) => service.recache_workgroup(*id).await,
        };
        match result {
            Ok(report) => {
                tracing::info!(
                    %target,
                    scanned = report.scanned,
                    changed = report.changed,
                    failed = report.failed.len(),
                    "recache complete"
                );
                summary.scanned += report.scanned;
                summary.changed += report.changed;
                summary.failed.extend(report.failed);
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(%target, "not found");
                summary.missing.push(target.to_string());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let config = match &args.config {
        Some(path) => RegistryConfig::load(path)?,
        None => RegistryConfig::from_env()?,
    };
    let db = match args.database_url {
        Some(url) => DatabaseConfig::with_url(url),
        None => DatabaseConfig::from_env()?,
    };
    let pool = db.connect().await?;
    let service = RegistryService::new(
        Arc::new(PgRegistryStore::new(pool.clone())),
        Arc::new(config),
    );

    let targets: Vec<Target> = match args.command {
        Command::Migrate => {
            migrate(&pool).await?;
            println!("schema up to date");
            return Ok(ExitCode::SUCCESS);
        }
        Command::DrainEvents { max } => {
            for event in service.drain_events(max).await? {
                println!("{}", serde_json::to_string(&event.event)?);
            }
            return Ok(ExitCode::SUCCESS);
        }
        Command::RecacheAuthority { ids } => ids
            .into_iter()
            .map(|id| Target::Authority(id.into()))
            .collect(),
        Command::RecacheWorkgroup { ids } => ids
            .into_iter()
            .map(|id| Target::Workgroup(id.into()))
            .collect(),
    };

    let summary = recache_targets(&service, &targets).await?;
    println!(
        "scanned {} item(s), {} changed",
        summary.scanned, summary.changed
    );
    for target in &summary.missing {
        eprintln!("not found: {target}");
    }
    for (item, error) in &summary.failed {
        eprintln!("failed: item {item}: {error}");
    }
    if summary.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,mdr_admin=debug".into()),
        )
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
