//! Cold-start wiring shared by every Lambda.

use aws_config::{BehaviorVersion, Region, SdkConfig};
use sqlx::PgPool;
use tracing::info;

use crate::auth::TokenService;
use crate::config::LimitConfig;
use crate::rate_limit::{store_for, RateLimitPolicy, RateLimiter};
use crate::secrets::resolve_jwt_secret;
use crate::{db, http, Config, Result};

/// Configuration, AWS clients and the database pool, built once per instance.
pub struct AppContext {
    pub config: Config,
    pub aws: SdkConfig,
    pub secrets: aws_sdk_secretsmanager::Client,
    pub pool: PgPool,
}

impl AppContext {
    pub async fn load() -> Result<Self> {
        let config = Config::from_env()?;
        http::init_cors_origin(&config.cors_origin);

        let aws = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.aws_region.clone()))
            .load()
            .await;
        let secrets = aws_sdk_secretsmanager::Client::new(&aws);
        let pool = db::create_pool(&config, &secrets).await?;

        info!(environment = ?config.environment, "Application context initialised");

        Ok(Self {
            config,
            aws,
            secrets,
            pool,
        })
    }

    /// Token service keyed with the resolved signing secret.
    pub async fn token_service(&self) -> Result<TokenService> {
        let secret = resolve_jwt_secret(&self.secrets, &self.config.jwt.secret).await?;
        Ok(TokenService::new(&secret, &self.config.jwt))
    }

    /// Limiter for one policy on the configured backend.
    pub fn rate_limiter(&self, name: &'static str, limit: &LimitConfig) -> Result<RateLimiter> {
        let policy = RateLimitPolicy::from_config(name, limit)?;
        Ok(RateLimiter::new(
            store_for(self.config.rate_limit.backend, &self.pool),
            policy,
        ))
    }
}
