//! JWT authentication utilities.
//!
//! Access, refresh and password-reset tokens are HS256 JWTs signed with one
//! secret and told apart by the `token_use` claim.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use lambda_http::Request;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::http::bearer_token;
use crate::{Error, Result};

/// User role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
}

/// JWT claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub email: String,
    pub role: Role,
    pub token_use: TokenKind,
    pub iss: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// Decoded user information from a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl TryFrom<Claims> for AuthenticatedUser {
    type Error = Error;

    fn try_from(claims: Claims) -> Result<Self> {
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| Error::Auth("Invalid token".to_string()))?;

        Ok(Self {
            user_id,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// Access/refresh pair handed to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// Issues and verifies tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    reset_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &str, config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: config.issuer.clone(),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
            reset_ttl: config.reset_ttl,
        }
    }

    pub fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
            TokenKind::Reset => self.reset_ttl,
        }
    }

    /// Issue a token of the given kind for `user`.
    pub fn issue(&self, user: &AuthenticatedUser, kind: TokenKind) -> Result<String> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.ttl(kind).as_secs())
            .map_err(|_| Error::Config("Token lifetime too large".to_string()))?;

        self.encode_claims(&Claims {
            sub: user.user_id.to_string(),
            email: user.email.clone(),
            role: user.role,
            token_use: kind,
            iss: self.issuer.clone(),
            iat: now,
            exp: now + ttl,
        })
    }

    /// Issue an access/refresh pair.
    pub fn issue_pair(&self, user: &AuthenticatedUser) -> Result<AuthTokens> {
        Ok(AuthTokens {
            access_token: self.issue(user, TokenKind::Access)?,
            refresh_token: self.issue(user, TokenKind::Refresh)?,
            expires_in: self.access_ttl.as_secs(),
        })
    }

    fn encode_claims(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature, issuer, expiry and kind.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<AuthenticatedUser> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => Error::Auth("Token expired".to_string()),
            _ => Error::Auth("Invalid token".to_string()),
        })?;

        if data.claims.token_use != expected {
            return Err(Error::Auth("Invalid token".to_string()));
        }

        AuthenticatedUser::try_from(data.claims)
    }
}

/// Require a valid access token on the request.
pub fn authenticate(event: &Request, tokens: &TokenService) -> Result<AuthenticatedUser> {
    let token = bearer_token(event).ok_or_else(|| Error::Auth("No token provided".to_string()))?;
    tokens.verify(token, TokenKind::Access)
}

/// Like [`authenticate`], but anonymous requests are allowed.
///
/// A token that is present but invalid is still rejected.
pub fn optional_user(event: &Request, tokens: &TokenService) -> Result<Option<AuthenticatedUser>> {
    match bearer_token(event) {
        Some(token) => tokens.verify(token, TokenKind::Access).map(Some),
        None => Ok(None),
    }
}

/// Fail with 403 unless the user has `role` (admins pass every check).
pub fn require_role(user: &AuthenticatedUser, role: Role) -> Result<()> {
    if user.role == role || user.is_admin() {
        Ok(())
    } else {
        Err(Error::Forbidden("Insufficient permissions".to_string()))
    }
}
