//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::config::SecretSource;
use crate::{Error, Result};

/// Minimum accepted length of the JWT signing secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Cached secrets with lazy initialization.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Database credentials from Secrets Manager.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtSecretPayload {
    #[serde(rename = "jwtSecret", alias = "jwt_secret")]
    jwt_secret: String,
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    {
        let cache = get_cache().read().await;
        if let Some(value) = cache.get(secret_arn) {
            return Ok(value.clone());
        }
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    {
        let mut cache = get_cache().write().await;
        cache.insert(secret_arn.to_string(), secret_string.clone());
    }

    Ok(secret_string)
}

/// Get database credentials from Secrets Manager.
pub async fn get_database_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    let secret_string = get_secret(client, secret_arn).await?;

    serde_json::from_str(&secret_string)
        .map_err(|e| Error::Aws(format!("Failed to parse database credentials: {}", e)))
}

/// Resolve the JWT signing secret from its configured source.
pub async fn resolve_jwt_secret(client: &SecretsClient, source: &SecretSource) -> Result<String> {
    let raw = match source {
        SecretSource::Inline(value) => value.clone(),
        SecretSource::SecretsManager(arn) => get_secret(client, arn).await?,
    };
    parse_jwt_secret(&raw)
}

/// Clear the secrets cache, e.g. after a credential rotation.
pub async fn clear_cache() {
    let mut cache = get_cache().write().await;
    cache.clear();
}

/// Accept either a bare secret string or a JSON object with a `jwtSecret` key.
fn parse_jwt_secret(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let secret = if trimmed.starts_with('{') {
        serde_json::from_str::<JwtSecretPayload>(trimmed)
            .map_err(|e| Error::Config(format!("Failed to parse JWT secret: {}", e)))?
            .jwt_secret
    } else {
        trimmed.to_string()
    };

    if secret.len() < MIN_JWT_SECRET_LEN {
        return Err(Error::Config(format!(
            "JWT secret must be at least {} bytes",
            MIN_JWT_SECRET_LEN
        )));
    }
    Ok(secret)
}
