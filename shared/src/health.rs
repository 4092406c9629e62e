//! Service health reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::time::Duration;
use tracing::error;

use crate::{db, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCheck {
    pub status: HealthStatus,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Checks {
    pub database: ComponentCheck,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub checks: Checks,
}

impl HealthReport {
    /// Build a report from the outcome of a database ping.
    pub fn from_ping(ping: Result<Duration>, elapsed_on_failure: Duration, now: DateTime<Utc>) -> Self {
        let database = match ping {
            Ok(latency) => ComponentCheck {
                status: HealthStatus::Healthy,
                response_time_ms: latency.as_millis() as u64,
            },
            Err(err) => {
                error!(error = %err, "Database health check failed");
                ComponentCheck {
                    status: HealthStatus::Unhealthy,
                    response_time_ms: elapsed_on_failure.as_millis() as u64,
                }
            }
        };

        Self {
            status: database.status,
            timestamp: now,
            version: env!("CARGO_PKG_VERSION"),
            checks: Checks { database },
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.status {
            HealthStatus::Healthy => 200,
            HealthStatus::Unhealthy => 503,
        }
    }
}

/// Check every dependency.
pub async fn check(pool: &PgPool) -> HealthReport {
    let start = std::time::Instant::now();
    let ping = db::ping(pool).await;
    HealthReport::from_ping(ping, start.elapsed(), Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_healthy_report() {
        let report = HealthReport::from_ping(Ok(Duration::from_millis(12)), Duration::ZERO, Utc::now());
        assert_eq!(report.status_code(), 200);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["checks"]["database"]["status"], "healthy");
        assert_eq!(json["checks"]["database"]["responseTimeMs"], 12);
        assert!(json["version"].is_string());
    }

    #[test]
    fn test_unhealthy_report() {
        let report = HealthReport::from_ping(
            Err(Error::Internal("connection refused".into())),
            Duration::from_millis(3000),
            Utc::now(),
        );
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.status_code(), 503);
        assert_eq!(report.checks.database.response_time_ms, 3000);
    }
}
