//! Auth Lambda - Registration, login and credential management.
//!
//! Endpoints:
//! - POST /api/auth/register - Create an account
//! - POST /api/auth/login - Exchange credentials for tokens
//! - POST /api/auth/refresh - Exchange a refresh token for a new pair
//! - POST /api/auth/change-password - Change password (authenticated)
//! - POST /api/auth/forgot-password - Email a password reset link
//! - POST /api/auth/reset-password - Set a new password with a reset token
//! - GET /api/auth/me - Current user

use chrono::Utc;
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shared::auth::{authenticate, TokenKind, TokenService};
use shared::http::{client_ip, success, RequestLog};
use shared::mailer::Mailer;
use shared::models::{
    AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, RefreshRequest,
    RegisterRequest, ResetPasswordRequest, UserResponse,
};
use shared::password::{hash_password, verify_password, verify_password_or_dummy};
use shared::rate_limit::ip_key;
use shared::validation::normalize_email;
use shared::{parse_body, users, AppContext, RateLimiter};

const RESET_REQUESTED: &str =
    "If an account exists for that email, a password reset link has been sent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Register,
    Login,
    Refresh,
    ChangePassword,
    ForgotPassword,
    ResetPassword,
    Me,
}

impl Route {
    fn parse(method: &str, path: &str) -> Option<Self> {
        match (method, path) {
            ("POST", "/api/auth/register") => Some(Self::Register),
            ("POST", "/api/auth/login") => Some(Self::Login),
            ("POST", "/api/auth/refresh") => Some(Self::Refresh),
            ("POST", "/api/auth/change-password") => Some(Self::ChangePassword),
            ("POST", "/api/auth/forgot-password") => Some(Self::ForgotPassword),
            ("POST", "/api/auth/reset-password") => Some(Self::ResetPassword),
            ("GET", "/api/auth/me") => Some(Self::Me),
            _ => None,
        }
    }

    /// Credential endpoints are throttled per client IP.
    fn is_rate_limited(self) -> bool {
        matches!(
            self,
            Self::Register | Self::Login | Self::ForgotPassword | Self::ResetPassword
        )
    }
}

/// Application state
struct AppState {
    db_pool: sqlx::PgPool,
    tokens: TokenService,
    limiter: RateLimiter,
    mailer: Option<Mailer>,
    bcrypt_cost: u32,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let ctx = AppContext::load().await?;
        let tokens = ctx.token_service().await?;
        let limiter = ctx.rate_limiter("auth", &ctx.config.rate_limit.auth)?;

        let mailer = Mailer::from_config(aws_sdk_ses::Client::new(&ctx.aws), &ctx.config);
        if mailer.is_none() {
            warn!("FROM_EMAIL not set, password reset emails are disabled");
        }

        Ok(Self {
            bcrypt_cost: ctx.config.bcrypt_cost,
            db_pool: ctx.pool,
            tokens,
            limiter,
            mailer,
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request = RequestLog::start(&event);

    info!("Auth request: {} {}", request.method, request.path);

    request.finish(dispatch(&state, &event, &request.method, &request.path).await)
}

async fn dispatch(
    state: &AppState,
    event: &Request,
    method: &str,
    path: &str,
) -> shared::Result<Response<Body>> {
    let route = Route::parse(method, path)
        .ok_or_else(|| shared::Error::NotFound("Not found".to_string()))?;

    if route.is_rate_limited() {
        state.limiter.check(&ip_key(&client_ip(event))).await?;
    }

    match route {
        Route::Register => register(state, event).await,
        Route::Login => login(state, event).await,
        Route::Refresh => refresh(state, event).await,
        Route::ChangePassword => change_password(state, event).await,
        Route::ForgotPassword => forgot_password(state, event).await,
        Route::ResetPassword => reset_password(state, event).await,
        Route::Me => me(state, event).await,
    }
}

async fn register(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let request = parse_body!(event.body(), RegisterRequest, normalized);

    if users::find_by_email(&state.db_pool, &request.email).await?.is_some() {
        return Err(shared::Error::Conflict("Email already registered".to_string()));
    }

    let password_hash = hash_password(&request.password, state.bcrypt_cost).await?;
    let user = users::create(&state.db_pool, &request.email, &password_hash, &request.name).await?;
    let tokens = state.tokens.issue_pair(&user.identity())?;

    info!(user_id = %user.id, "User registered");

    success(
        201,
        AuthResponse {
            user: user.into(),
            tokens,
        },
    )
}

async fn login(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let request = parse_body!(event.body(), LoginRequest);
    let invalid = || shared::Error::Auth("Invalid email or password".to_string());

    let user = users::find_by_email(&state.db_pool, &normalize_email(&request.email)).await?;

    // Unknown emails still pay for a bcrypt check
    let stored_hash = user.as_ref().map(|u| u.password_hash.as_str());
    if !verify_password_or_dummy(&request.password, stored_hash, state.bcrypt_cost).await? {
        return Err(invalid());
    }
    let user = user.ok_or_else(invalid)?;
    if !user.is_active {
        return Err(shared::Error::Forbidden("Account is disabled".to_string()));
    }

    users::touch_last_login(&state.db_pool, user.id).await?;
    let tokens = state.tokens.issue_pair(&user.identity())?;

    info!(user_id = %user.id, "User logged in");

    success(
        200,
        AuthResponse {
            user: user.into(),
            tokens,
        },
    )
}

async fn refresh(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let request = parse_body!(event.body(), RefreshRequest);
    let claimed = state.tokens.verify(&request.refresh_token, TokenKind::Refresh)?;

    let user = users::find_by_id(&state.db_pool, claimed.user_id)
        .await?
        .ok_or_else(|| shared::Error::Auth("User not found".to_string()))?;
    if !user.is_active {
        return Err(shared::Error::Forbidden("Account is disabled".to_string()));
    }

    // Role and email come from the database, not the old token
    success(200, state.tokens.issue_pair(&user.identity())?)
}

async fn change_password(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let caller = authenticate(event, &state.tokens)?;
    let request = parse_body!(event.body(), ChangePasswordRequest);

    let user = users::get(&state.db_pool, caller.user_id).await?;
    if !verify_password(&request.current_password, &user.password_hash).await? {
        return Err(shared::Error::Validation(
            "Current password is incorrect".to_string(),
        ));
    }

    let password_hash = hash_password(&request.new_password, state.bcrypt_cost).await?;
    users::update_password(&state.db_pool, user.id, &password_hash).await?;

    info!(user_id = %user.id, "Password changed");

    success(
        200,
        serde_json::json!({ "message": "Password updated successfully" }),
    )
}

async fn forgot_password(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let request = parse_body!(event.body(), ForgotPasswordRequest, normalized);

    // Same response whether or not the account exists
    let user = users::find_by_email(&state.db_pool, &request.email).await?;
    if let Some(user) = user.filter(|u| u.is_active) {
        let token = state.tokens.issue(&user.identity(), TokenKind::Reset)?;
        let ttl = chrono::Duration::from_std(state.tokens.ttl(TokenKind::Reset))
            .map_err(|_| shared::Error::Config("Reset token lifetime too large".to_string()))?;
        users::set_reset_token(&state.db_pool, user.id, &token, Utc::now() + ttl).await?;

        match &state.mailer {
            Some(mailer) => {
                if let Err(e) = mailer.send_password_reset(&user.email, &token).await {
                    error!(user_id = %user.id, error = %e, "Failed to send password reset email");
                }
            }
            None => info!(user_id = %user.id, "Password reset requested, email delivery disabled"),
        }
    }

    success(200, serde_json::json!({ "message": RESET_REQUESTED }))
}

async fn reset_password(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let request = parse_body!(event.body(), ResetPasswordRequest);
    let invalid = || shared::Error::Validation("Invalid or expired reset token".to_string());

    let claimed = state
        .tokens
        .verify(&request.token, TokenKind::Reset)
        .map_err(|_| invalid())?;

    let user = users::find_by_id(&state.db_pool, claimed.user_id)
        .await?
        .ok_or_else(invalid)?;
    if !user.reset_token_matches(&request.token, Utc::now()) {
        return Err(invalid());
    }

    let password_hash = hash_password(&request.password, state.bcrypt_cost).await?;
    users::update_password(&state.db_pool, user.id, &password_hash).await?;

    info!(user_id = %user.id, "Password reset");

    success(
        200,
        serde_json::json!({ "message": "Password has been reset successfully" }),
    )
}

async fn me(state: &AppState, event: &Request) -> shared::Result<Response<Body>> {
    let caller = authenticate(event, &state.tokens)?;
    let user = users::get(&state.db_pool, caller.user_id).await?;
    success(200, UserResponse::from(user))
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parsing() {
        assert_eq!(Route::parse("POST", "/api/auth/register"), Some(Route::Register));
        assert_eq!(Route::parse("POST", "/api/auth/login"), Some(Route::Login));
        assert_eq!(Route::parse("GET", "/api/auth/me"), Some(Route::Me));
        assert_eq!(
            Route::parse("POST", "/api/auth/reset-password"),
            Some(Route::ResetPassword)
        );
        assert_eq!(Route::parse("GET", "/api/auth/login"), None);
        assert_eq!(Route::parse("POST", "/api/auth/logout"), None);
    }

    #[test]
    fn test_only_credential_routes_are_rate_limited() {
        assert!(Route::Register.is_rate_limited());
        assert!(Route::Login.is_rate_limited());
        assert!(Route::ForgotPassword.is_rate_limited());
        assert!(Route::ResetPassword.is_rate_limited());
        assert!(!Route::Refresh.is_rate_limited());
        assert!(!Route::ChangePassword.is_rate_limited());
        assert!(!Route::Me.is_rate_limited());
    }
}
