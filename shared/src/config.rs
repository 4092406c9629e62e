//! Configuration management for Lambda functions.

use std::env;
use std::time::Duration;

use crate::{Error, Result};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(Error::Config(format!("Unknown APP_ENV: {}", other))),
        }
    }
}

/// Where database credentials come from.
#[derive(Debug, Clone)]
pub enum DatabaseSource {
    /// Full connection URL (local development, tests)
    Url(String),
    /// Host/name from the environment, credentials from Secrets Manager
    Secret {
        host: String,
        port: u16,
        name: String,
        secret_arn: String,
    },
}

/// Where the JWT signing secret comes from.
#[derive(Debug, Clone)]
pub enum SecretSource {
    Inline(String),
    SecretsManager(String),
}

/// Which store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Postgres,
}

/// Token lifetimes and signing settings.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: SecretSource,
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub reset_ttl: Duration,
}

/// Bedrock model settings.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub model_id: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub max_input_chars: usize,
}

/// A single fixed-window limit.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub block: Option<Duration>,
}

/// Rate limiter settings.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,
    pub ai: LimitConfig,
    pub auth: LimitConfig,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub database: DatabaseSource,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub jwt: JwtConfig,
    pub bcrypt_cost: u32,
    pub ai: AiConfig,
    pub rate_limit: RateLimitConfig,
    /// Value of the Access-Control-Allow-Origin header
    pub cors_origin: String,
    /// Base URL used in emailed links
    pub frontend_url: String,
    /// Sender address; email delivery is disabled when unset
    pub from_email: Option<String>,
    pub aws_region: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV") {
            Some(v) => Environment::parse(&v)?,
            None => Environment::Development,
        };

        let database = match get("DATABASE_URL") {
            Some(url) => DatabaseSource::Url(url),
            None => DatabaseSource::Secret {
                host: get("DB_HOST")
                    .ok_or_else(|| Error::Config("DATABASE_URL or DB_HOST must be set".to_string()))?,
                port: parse_or(get("DB_PORT"), "DB_PORT", 5432)?,
                name: get("DB_NAME").unwrap_or_else(|| "aidocs_assistant".to_string()),
                secret_arn: get("DB_SECRET_ARN")
                    .ok_or_else(|| Error::Config("DB_SECRET_ARN not set".to_string()))?,
            },
        };

        let jwt_secret = match (get("JWT_SECRET"), get("JWT_SECRET_ARN")) {
            (Some(secret), _) => SecretSource::Inline(secret),
            (None, Some(arn)) => SecretSource::SecretsManager(arn),
            (None, None) => {
                return Err(Error::Config(
                    "JWT_SECRET or JWT_SECRET_ARN must be set".to_string(),
                ))
            }
        };

        let jwt = JwtConfig {
            secret: jwt_secret,
            issuer: get("JWT_ISSUER").unwrap_or_else(|| "aidocs-assistant".to_string()),
            access_ttl: duration_or(get("JWT_EXPIRES_IN"), "JWT_EXPIRES_IN", "1h")?,
            refresh_ttl: duration_or(get("JWT_REFRESH_EXPIRES_IN"), "JWT_REFRESH_EXPIRES_IN", "7d")?,
            reset_ttl: duration_or(
                get("PASSWORD_RESET_EXPIRES_IN"),
                "PASSWORD_RESET_EXPIRES_IN",
                "1h",
            )?,
        };

        let bcrypt_cost: u32 = parse_or(get("BCRYPT_COST"), "BCRYPT_COST", 10)?;

        let ai = AiConfig {
            model_id: get("BEDROCK_MODEL_ID")
                .unwrap_or_else(|| "anthropic.claude-3-haiku-20240307-v1:0".to_string()),
            max_tokens: parse_or(get("AI_MAX_TOKENS"), "AI_MAX_TOKENS", 4096)?,
            temperature: parse_or(get("AI_TEMPERATURE"), "AI_TEMPERATURE", 0.7)?,
            top_p: parse_or(get("AI_TOP_P"), "AI_TOP_P", 0.9)?,
            max_input_chars: parse_or(get("AI_MAX_INPUT_CHARS"), "AI_MAX_INPUT_CHARS", 100_000)?,
        };

        let backend = match get("RATE_LIMIT_BACKEND").as_deref().map(str::to_ascii_lowercase) {
            None => RateLimitBackend::Postgres,
            Some(v) if v == "postgres" => RateLimitBackend::Postgres,
            Some(v) if v == "memory" => RateLimitBackend::Memory,
            Some(v) => return Err(Error::Config(format!("Unknown RATE_LIMIT_BACKEND: {}", v))),
        };

        let default_auth_max = if environment == Environment::Production { 5 } else { 100 };

        let rate_limit = RateLimitConfig {
            backend,
            ai: LimitConfig {
                max_requests: parse_or(get("AI_RATE_LIMIT_MAX"), "AI_RATE_LIMIT_MAX", 100)?,
                window: duration_or(get("AI_RATE_LIMIT_WINDOW"), "AI_RATE_LIMIT_WINDOW", "60s")?,
                block: Some(duration_or(get("AI_RATE_LIMIT_BLOCK"), "AI_RATE_LIMIT_BLOCK", "5m")?)
                    .filter(|d| !d.is_zero()),
            },
            auth: LimitConfig {
                max_requests: parse_or(
                    get("AUTH_RATE_LIMIT_MAX"),
                    "AUTH_RATE_LIMIT_MAX",
                    default_auth_max,
                )?,
                window: duration_or(get("AUTH_RATE_LIMIT_WINDOW"), "AUTH_RATE_LIMIT_WINDOW", "1h")?,
                block: None,
            },
        };

        Ok(Self {
            environment,
            database,
            db_max_connections: parse_or(get("DB_MAX_CONNECTIONS"), "DB_MAX_CONNECTIONS", 5)?,
            db_acquire_timeout: Duration::from_secs(parse_or(
                get("DB_ACQUIRE_TIMEOUT_SECS"),
                "DB_ACQUIRE_TIMEOUT_SECS",
                3,
            )?),
            jwt,
            bcrypt_cost: bcrypt_cost.clamp(4, 31),
            ai,
            rate_limit,
            cors_origin: get("CORS_ORIGIN").unwrap_or_else(|| "*".to_string()),
            frontend_url: get("FRONTEND_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            from_email: get("FROM_EMAIL"),
            aws_region: get("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("Invalid value for {}: {}", key, v))),
        None => Ok(default),
    }
}

fn duration_or(value: Option<String>, key: &str, default: &str) -> Result<Duration> {
    let raw = value.unwrap_or_else(|| default.to_string());
    parse_duration(&raw).ok_or_else(|| Error::Config(format!("Invalid duration for {}: {}", key, raw)))
}

/// Parse `90`, `45s`, `30m`, `1h` or `7d` into a duration.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let (number, multiplier) = match value.char_indices().last() {
        Some((idx, 's')) => (&value[..idx], 1),
        Some((idx, 'm')) => (&value[..idx], 60),
        Some((idx, 'h')) => (&value[..idx], 60 * 60),
        Some((idx, 'd')) => (&value[..idx], 24 * 60 * 60),
        _ => (value, 1),
    };

    let number: u64 = number.trim().parse().ok()?;
    number.checked_mul(multiplier).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("45s"), Some(Duration::from_secs(45)));
        assert_eq!(parse_duration("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("h"), None);
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/aidocs"),
            ("JWT_SECRET", "a-very-long-development-secret-value-123"),
        ])
        .unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert!(matches!(config.database, DatabaseSource::Url(_)));
        assert_eq!(config.jwt.access_ttl, Duration::from_secs(3600));
        assert_eq!(config.jwt.refresh_ttl, Duration::from_secs(7 * 86_400));
        assert_eq!(config.bcrypt_cost, 10);
        assert_eq!(config.rate_limit.backend, RateLimitBackend::Postgres);
        assert_eq!(config.rate_limit.ai.max_requests, 100);
        assert_eq!(config.rate_limit.ai.window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.ai.block, Some(Duration::from_secs(300)));
        assert_eq!(config.rate_limit.auth.max_requests, 100);
        assert_eq!(config.cors_origin, "*");
        assert!(config.from_email.is_none());
    }

    #[test]
    fn test_production_tightens_auth_limit() {
        let config = config_from(&[
            ("APP_ENV", "production"),
            ("DB_HOST", "db.internal"),
            ("DB_SECRET_ARN", "arn:aws:secretsmanager:us-east-1:1:secret:db"),
            ("JWT_SECRET_ARN", "arn:aws:secretsmanager:us-east-1:1:secret:jwt"),
            ("FRONTEND_URL", "https://docs.example.com/"),
        ])
        .unwrap();

        assert_eq!(config.rate_limit.auth.max_requests, 5);
        assert_eq!(config.frontend_url, "https://docs.example.com");
        assert!(matches!(config.jwt.secret, SecretSource::SecretsManager(_)));
        match config.database {
            DatabaseSource::Secret { port, name, .. } => {
                assert_eq!(port, 5432);
                assert_eq!(name, "aidocs_assistant");
            }
            other => panic!("unexpected database source: {:?}", other),
        }
    }

    #[test]
    fn test_missing_jwt_secret_is_an_error() {
        let err = config_from(&[("DATABASE_URL", "postgres://localhost/aidocs")]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/aidocs"),
            ("JWT_SECRET", "a-very-long-development-secret-value-123"),
            ("AI_RATE_LIMIT_MAX", "lots"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("AI_RATE_LIMIT_MAX"));

        let err = config_from(&[
            ("DATABASE_URL", "postgres://localhost/aidocs"),
            ("JWT_SECRET", "a-very-long-development-secret-value-123"),
            ("RATE_LIMIT_BACKEND", "redis"),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_bcrypt_cost_is_clamped() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/aidocs"),
            ("JWT_SECRET", "a-very-long-development-secret-value-123"),
            ("BCRYPT_COST", "2"),
            ("AI_RATE_LIMIT_BLOCK", "0"),
        ])
        .unwrap();
        assert_eq!(config.bcrypt_cost, 4);
        assert_eq!(config.rate_limit.ai.block, None);
    }
}
