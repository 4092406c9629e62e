//! Migration Lambda - Applies pending schema migrations.
//!
//! Invoked directly (deploy hook, console or a schedule) with any payload.
//! Also clears expired rate limit windows.

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use shared::rate_limit::PostgresStore;
use shared::{db, AppContext};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MigrateResponse {
    migrated: bool,
    purged_rate_limits: u64,
}

/// Application state
struct AppState {
    db_pool: sqlx::PgPool,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let ctx = AppContext::load().await?;
        Ok(Self { db_pool: ctx.pool })
    }
}

async fn handler(
    state: Arc<AppState>,
    _event: LambdaEvent<serde_json::Value>,
) -> Result<MigrateResponse, Error> {
    info!("Running database migrations");

    if let Err(e) = db::run_migrations(&state.db_pool).await {
        error!(error = %e, "Migrations failed");
        return Err(e.into());
    }

    info!("Migrations complete");

    let purged_rate_limits = PostgresStore::new(state.db_pool.clone())
        .purge_expired(chrono::Utc::now())
        .await?;
    info!(purged_rate_limits, "Expired rate limit windows removed");

    Ok(MigrateResponse {
        migrated: true,
        purged_rate_limits,
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);

    run(service_fn(move |event| {
        let state = Arc::clone(&state);
        async move { handler(state, event).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let json = serde_json::to_value(MigrateResponse {
            migrated: true,
            purged_rate_limits: 3,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "migrated": true, "purgedRateLimits": 3 })
        );
    }
}
