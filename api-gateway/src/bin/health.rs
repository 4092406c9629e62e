//! Health Lambda - Liveness and dependency status.
//!
//! Endpoints:
//! - GET /health - 200 when every dependency responds, 503 otherwise

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shared::http::{json_response, RequestLog};
use shared::{health, ApiResponse, AppContext};

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

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request = RequestLog::start(&event);

    info!("Health request: {} {}", request.method, request.path);

    let result = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let report = health::check(&state.db_pool).await;
            let status = report.status_code();
            let healthy = status == 200;
            if !healthy {
                warn!("Health check reported unhealthy");
            }

            json_response(
                status,
                &ApiResponse {
                    success: healthy,
                    data: Some(report),
                    error: (!healthy).then(|| "Service unhealthy".to_string()),
                },
            )
        }
        _ => Err(shared::Error::NotFound("Not found".to_string())),
    };

    request.finish(result)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}
