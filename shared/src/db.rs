//! Database connection management.

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::{Duration, Instant};

use crate::config::DatabaseSource;
use crate::secrets::get_database_credentials;
use crate::{Config, Error, Result};

/// Embedded schema migrations.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a database connection pool.
pub async fn create_pool(
    config: &Config,
    secrets: &aws_sdk_secretsmanager::Client,
) -> Result<PgPool> {
    let options = match &config.database {
        DatabaseSource::Url(url) => PgConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("Invalid DATABASE_URL: {}", e)))?,
        DatabaseSource::Secret {
            host,
            port,
            name,
            secret_arn,
        } => {
            let creds = get_database_credentials(secrets, secret_arn).await?;
            PgConnectOptions::new()
                .host(creds.host.as_deref().unwrap_or(host))
                .port(creds.port.unwrap_or(*port))
                .database(creds.dbname.as_deref().unwrap_or(name))
                .username(&creds.username)
                .password(&creds.password)
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.db_acquire_timeout)
        .connect_with(options)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}

/// Apply any pending migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| Error::Database(e.into()))
}

/// Round-trip a trivial query, returning its latency.
pub async fn ping(pool: &PgPool) -> Result<Duration> {
    let start = Instant::now();
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(start.elapsed())
}
