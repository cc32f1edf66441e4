//! Connection pool configuration and schema bootstrap.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DATABASE_POOL_SIZE: &str = "DATABASE_POOL_SIZE";

const DEFAULT_POOL_SIZE: u32 = 5;

const SCHEMA: &str = include_str!("../migrations/0001_registry.sql");

/// Where to connect and how many connections the batch jobs may hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// `DATABASE_URL` is required; `DATABASE_POOL_SIZE` is optional.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            database_url: url.into(),
            max_connections: DEFAULT_POOL_SIZE,
        }
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup(ENV_DATABASE_URL)
            .with_context(|| format!("{ENV_DATABASE_URL} is not set"))?;
        let mut config = Self::with_url(url);
        if let Some(size) = lookup(ENV_DATABASE_POOL_SIZE) {
            config.max_connections = size
                .parse()
                .with_context(|| format!("{ENV_DATABASE_POOL_SIZE}={size}"))?;
        }
        Ok(config)
    }

    pub async fn connect(&self) -> Result<PgPool> {
        let masked = mask_database_url(&self.database_url);
        tracing::info!(url = %masked, max_connections = self.max_connections, "connecting to database");
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .with_context(|| format!("connecting to {masked}"))
    }
}

/// Create the `mdr` schema if it is missing. Every statement is idempotent.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    tracing::info!("applying registry schema");
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .context("applying registry schema")?;
    Ok(())
}

/// Mask sensitive information in database URL for logging
pub fn mask_database_url(url: &str) -> String {
    if let Ok(parsed) = url::Url::parse(url) {
        let mut masked = parsed.clone();
        if parsed.password().is_some() {
            let _ = masked.set_password(Some("***"));
        }
        masked.to_string()
    } else if url.len() > 20 {
        format!("{}***{}", &url[..10], &url[url.len() - 10..])
    } else {
        "***".to_string()
    }
}
