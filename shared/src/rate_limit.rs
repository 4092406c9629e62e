//! Fixed-window rate limiting keyed by client IP or user.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{LimitConfig, RateLimitBackend};
use crate::{Error, Result};

/// Memory stores purge expired windows once they hold this many keys.
const PURGE_THRESHOLD: usize = 1024;

/// Postgres stores delete expired rows on the first hit after a cold start and every this many hits after.
const PURGE_EVERY_HITS: u64 = 500;

/// Same rule as [`WindowState::is_expired`].
const PURGE_EXPIRED_SQL: &str = "DELETE FROM rate_limits \
     WHERE window_reset_at <= $1 AND (blocked_until IS NULL OR blocked_until <= $1)";

/// Limits applied to one family of keys.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Key prefix, e.g. `auth` or `ai`
    pub name: &'static str,
    pub max_requests: u32,
    pub window: Duration,
    /// Lockout after the limit is hit; without one the caller waits out the window.
    pub block: Option<Duration>,
}

impl RateLimitPolicy {
    pub fn from_config(name: &'static str, config: &LimitConfig) -> Result<Self> {
        let to_chrono = |d: std::time::Duration| {
            Duration::from_std(d)
                .map_err(|_| Error::Config(format!("Rate limit duration for {} is too large", name)))
        };

        Ok(Self {
            name,
            max_requests: config.max_requests,
            window: to_chrono(config.window)?,
            block: config.block.map(to_chrono).transpose()?,
        })
    }
}

/// Outcome of a single hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Rejected { retry_after_secs: u64 },
}

/// Counter state for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl WindowState {
    pub fn fresh(policy: &RateLimitPolicy, now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_reset_at: now + policy.window,
            blocked_until: None,
        }
    }

    /// Record one request at `now` and decide whether it may proceed.
    pub fn hit(&mut self, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Decision {
        if let Some(until) = self.blocked_until {
            if until > now {
                return Decision::Rejected {
                    retry_after_secs: seconds_until(until, now),
                };
            }
            *self = Self::fresh(policy, now);
        }

        if self.window_reset_at <= now {
            *self = Self::fresh(policy, now);
        }

        if self.count < policy.max_requests {
            self.count += 1;
            return Decision::Allowed {
                remaining: policy.max_requests - self.count,
            };
        }

        match policy.block {
            Some(block) => {
                let until = now + block;
                self.blocked_until = Some(until);
                Decision::Rejected {
                    retry_after_secs: seconds_until(until, now),
                }
            }
            None => Decision::Rejected {
                retry_after_secs: seconds_until(self.window_reset_at, now),
            },
        }
    }

    /// Whether this state no longer affects any future request.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at <= now && self.blocked_until.map_or(true, |until| until <= now)
    }
}

/// Whole seconds until `at`, rounded up, never less than one.
fn seconds_until(at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let millis = (at - now).num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}

/// Persistence for window state.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Atomically apply one hit for `key` and return the decision.
    async fn hit(&self, key: &str, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Result<Decision>;
}

/// Per-process store. Counters reset on cold start and are not shared
/// between concurrent Lambda instances.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: Mutex<HashMap<String, WindowState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every window that has fully expired.
    pub fn purge(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut windows = self.lock()?;
        let before = windows.len();
        windows.retain(|_, state| !state.is_expired(now));
        Ok(before - windows.len())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, WindowState>>> {
        self.windows
            .lock()
            .map_err(|e| Error::Internal(format!("Rate limiter lock poisoned: {}", e)))
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn hit(&self, key: &str, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Result<Decision> {
        let mut windows = self.lock()?;
        if windows.len() >= PURGE_THRESHOLD {
            windows.retain(|_, state| !state.is_expired(now));
        }

        let state = windows
            .entry(key.to_string())
            .or_insert_with(|| WindowState::fresh(policy, now));
        Ok(state.hit(policy, now))
    }
}

/// Store backed by the `rate_limits` table, shared by every instance.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    hits: Arc<AtomicU64>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Delete rows whose window and block have both ended.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(PURGE_EXPIRED_SQL)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn purge_due(previous_hits: u64) -> bool {
    previous_hits % PURGE_EVERY_HITS == 0
}

#[async_trait]
impl RateLimitStore for PostgresStore {
    async fn hit(&self, key: &str, policy: &RateLimitPolicy, now: DateTime<Utc>) -> Result<Decision> {
        let mut tx = self.pool.begin().await?;

        // Make sure a row exists so FOR UPDATE always has something to lock
        sqlx::query(
            r#"
            INSERT INTO rate_limits (key, count, window_reset_at)
            VALUES ($1, 0, $2)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(now + policy.window)
        .execute(&mut *tx)
        .await?;

        let (count, window_reset_at, blocked_until): (i32, DateTime<Utc>, Option<DateTime<Utc>>) =
            sqlx::query_as(
                "SELECT count, window_reset_at, blocked_until FROM rate_limits WHERE key = $1 FOR UPDATE",
            )
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        let mut state = WindowState {
            count: u32::try_from(count).unwrap_or(0),
            window_reset_at,
            blocked_until,
        };
        let decision = state.hit(policy, now);

        sqlx::query(
            r#"
            UPDATE rate_limits
            SET count = $2, window_reset_at = $3, blocked_until = $4
            WHERE key = $1
            "#,
        )
        .bind(key)
        .bind(i32::try_from(state.count).unwrap_or(i32::MAX))
        .bind(state.window_reset_at)
        .bind(state.blocked_until)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if purge_due(self.hits.fetch_add(1, Ordering::Relaxed)) {
            match self.purge_expired(now).await {
                Ok(removed) => debug!(removed, "Purged expired rate limit windows"),
                Err(e) => warn!(error = %e, "Failed to purge expired rate limit windows"),
            }
        }

        Ok(decision)
    }
}

/// Pick the store for the configured backend.
pub fn store_for(backend: RateLimitBackend, pool: &PgPool) -> Arc<dyn RateLimitStore> {
    match backend {
        RateLimitBackend::Memory => Arc::new(MemoryStore::new()),
        RateLimitBackend::Postgres => Arc::new(PostgresStore::new(pool.clone())),
    }
}

pub fn ip_key(ip: &str) -> String {
    format!("ip:{}", ip)
}

pub fn user_key(user_id: Uuid) -> String {
    format!("user:{}", user_id)
}

/// A policy bound to a store.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request for `subject`, failing with [`Error::RateLimited`] once over the limit.
    pub async fn check(&self, subject: &str) -> Result<()> {
        let key = format!("{}:{}", self.policy.name, subject);
        match self.store.hit(&key, &self.policy, Utc::now()).await? {
            Decision::Allowed { .. } => Ok(()),
            Decision::Rejected { retry_after_secs } => {
                warn!(key = %key, retry_after_secs, "Rate limit exceeded");
                Err(Error::RateLimited { retry_after_secs })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32, window_secs: i64, block_secs: Option<i64>) -> RateLimitPolicy {
        RateLimitPolicy {
            name: "test",
            max_requests: max,
            window: Duration::seconds(window_secs),
            block: block_secs.map(Duration::seconds),
        }
    }

    #[test]
    fn test_allows_until_limit_then_waits_for_window() {
        let policy = policy(3, 60, None);
        let start = Utc::now();
        let mut state = WindowState::fresh(&policy, start);

        assert_eq!(state.hit(&policy, start), Decision::Allowed { remaining: 2 });
        assert_eq!(state.hit(&policy, start), Decision::Allowed { remaining: 1 });
        assert_eq!(state.hit(&policy, start), Decision::Allowed { remaining: 0 });
        assert_eq!(
            state.hit(&policy, start + Duration::seconds(20)),
            Decision::Rejected { retry_after_secs: 40 }
        );

        // New window
        let later = start + Duration::seconds(61);
        assert_eq!(state.hit(&policy, later), Decision::Allowed { remaining: 2 });
        assert_eq!(state.window_reset_at, later + Duration::seconds(60));
    }

    #[test]
    fn test_block_period_outlasts_window() {
        let policy = policy(1, 60, Some(300));
        let start = Utc::now();
        let mut state = WindowState::fresh(&policy, start);

        assert!(matches!(state.hit(&policy, start), Decision::Allowed { .. }));
        assert_eq!(
            state.hit(&policy, start + Duration::seconds(1)),
            Decision::Rejected { retry_after_secs: 300 }
        );

        // Window has rolled over but the block still holds
        assert_eq!(
            state.hit(&policy, start + Duration::seconds(101)),
            Decision::Rejected { retry_after_secs: 200 }
        );

        let after_block = start + Duration::seconds(302);
        assert_eq!(state.hit(&policy, after_block), Decision::Allowed { remaining: 0 });
        assert_eq!(state.blocked_until, None);
    }

    #[test]
    fn test_retry_after_rounds_up_to_one_second() {
        let now = Utc::now();
        assert_eq!(seconds_until(now + Duration::milliseconds(10), now), 1);
        assert_eq!(seconds_until(now + Duration::milliseconds(1500), now), 2);
        assert_eq!(seconds_until(now - Duration::seconds(5), now), 1);
    }

    #[test]
    fn test_expiry() {
        let policy = policy(1, 60, Some(300));
        let now = Utc::now();
        let mut state = WindowState::fresh(&policy, now);
        assert!(!state.is_expired(now));
        assert!(state.is_expired(now + Duration::seconds(60)));

        state.blocked_until = Some(now + Duration::seconds(300));
        assert!(!state.is_expired(now + Duration::seconds(60)));
    }

    #[test]
    fn test_policy_from_config() {
        let config = LimitConfig {
            max_requests: 100,
            window: std::time::Duration::from_secs(60),
            block: Some(std::time::Duration::from_secs(300)),
        };
        let policy = RateLimitPolicy::from_config("ai", &config).unwrap();
        assert_eq!(policy.window, Duration::seconds(60));
        assert_eq!(policy.block, Some(Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_memory_store_keys_are_independent() {
        let store = MemoryStore::new();
        let policy = policy(1, 60, None);
        let now = Utc::now();

        assert!(matches!(store.hit("a", &policy, now).await.unwrap(), Decision::Allowed { .. }));
        assert!(matches!(store.hit("a", &policy, now).await.unwrap(), Decision::Rejected { .. }));
        assert!(matches!(store.hit("b", &policy, now).await.unwrap(), Decision::Allowed { .. }));
        assert_eq!(store.len().unwrap(), 2);

        assert_eq!(store.purge(now + Duration::seconds(61)).unwrap(), 2);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_limiter_returns_rate_limited_error() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), policy(2, 3600, None));
        let subject = ip_key("203.0.113.9");

        limiter.check(&subject).await.unwrap();
        limiter.check(&subject).await.unwrap();
        let err = limiter.check(&subject).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
        assert!(matches!(err, Error::RateLimited { retry_after_secs } if retry_after_secs > 3500));

        // Other subjects are unaffected
        limiter.check(&user_key(Uuid::new_v4())).await.unwrap();
    }

    #[test]
    fn test_postgres_purge_schedule() {
        assert!(purge_due(0));
        assert!(!purge_due(1));
        assert!(!purge_due(PURGE_EVERY_HITS - 1));
        assert!(purge_due(PURGE_EVERY_HITS));
        assert!(purge_due(PURGE_EVERY_HITS * 3));
    }

    #[test]
    fn test_purge_sql_keeps_blocked_keys() {
        assert!(PURGE_EXPIRED_SQL.starts_with("DELETE FROM rate_limits"));
        assert!(PURGE_EXPIRED_SQL.contains("window_reset_at <= $1"));
        assert!(PURGE_EXPIRED_SQL.contains("(blocked_until IS NULL OR blocked_until <= $1)"));
    }
}
