//! Users Lambda - Profile management and user administration.
//!
//! Endpoints:
//! - GET /api/users/profile - Current user's profile
//! - PUT /api/users/profile - Update name, email or password
//! - DELETE /api/users/profile - Delete account and its documents
//! - GET /api/users - List users (admin)
//! - PUT /api/users/{id} - Change role or active flag (admin)

use lambda_http::{run, service_fn, Body, Error, Request, Response};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use shared::auth::{authenticate, require_role, Role, TokenService};
use shared::http::{no_content, parse_json_body, parse_uuid, segments, success, RequestLog};
use shared::models::{AdminUpdateUserRequest, UpdateProfileRequest, UserList, UserResponse};
use shared::password::{hash_password, verify_password};
use shared::{parse_body, users, AppContext, Pagination};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    GetProfile,
    UpdateProfile,
    DeleteProfile,
    List,
    AdminUpdate(String),
}

impl Route {
    fn parse(method: &str, path: &str) -> Option<Self> {
        match (method, segments(path).as_slice()) {
            ("GET", ["api", "users", "profile"]) => Some(Self::GetProfile),
            ("PUT", ["api", "users", "profile"]) => Some(Self::UpdateProfile),
            ("DELETE", ["api", "users", "profile"]) => Some(Self::DeleteProfile),
            ("GET", ["api", "users"]) => Some(Self::List),
            ("PUT", ["api", "users", id]) => Some(Self::AdminUpdate(id.to_string())),
            _ => None,
        }
    }
}

/// Admins may not lock themselves out.
fn check_self_update(
    caller_id: Uuid,
    target_id: Uuid,
    request: &AdminUpdateUserRequest,
) -> shared::Result<()> {
    if caller_id != target_id {
        return Ok(());
    }
    if request.role.is_some_and(|role| role != Role::Admin) {
        return Err(shared::Error::Validation(
            "You cannot change your own role".to_string(),
        ));
    }
    if request.is_active == Some(false) {
        return Err(shared::Error::Validation(
            "You cannot deactivate your own account".to_string(),
        ));
    }
    Ok(())
}

/// A new password needs the current one: 400 when it is missing, 401 when it is wrong.
async fn check_current_password(
    request: &UpdateProfileRequest,
    password_hash: &str,
) -> shared::Result<()> {
    if request.new_password.is_none() {
        return Ok(());
    }

    let current = request
        .current_password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            shared::Error::Validation(
                "Current password is required to set a new password".to_string(),
            )
        })?;
    if !verify_password(current, password_hash).await? {
        return Err(shared::Error::Auth(
            "Current password is incorrect".to_string(),
        ));
    }
    Ok(())
}

/// Application state
struct AppState {
    db_pool: sqlx::PgPool,
    tokens: TokenService,
    bcrypt_cost: u32,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let ctx = AppContext::load().await?;
        let tokens = ctx.token_service().await?;

        Ok(Self {
            bcrypt_cost: ctx.config.bcrypt_cost,
            db_pool: ctx.pool,
            tokens,
        })
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let request = RequestLog::start(&event);

    info!("Users request: {} {}", request.method, request.path);

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
    let caller = authenticate(event, &state.tokens)?;

    match route {
        Route::GetProfile => {
            let user = users::get(&state.db_pool, caller.user_id).await?;
            success(200, UserResponse::from(user))
        }

        Route::UpdateProfile => {
            let request = parse_body!(event.body(), UpdateProfileRequest, normalized);
            if request.is_empty() {
                return Err(shared::Error::Validation("No changes provided".to_string()));
            }

            let mut user = users::get(&state.db_pool, caller.user_id).await?;

            // Verify before touching anything
            check_current_password(&request, &user.password_hash).await?;

            if request.name.is_some() || request.email.is_some() {
                user = users::update_profile(
                    &state.db_pool,
                    user.id,
                    request.name.as_deref(),
                    request.email.as_deref(),
                )
                .await?;
            }

            if let Some(new_password) = &request.new_password {
                let password_hash = hash_password(new_password, state.bcrypt_cost).await?;
                users::update_password(&state.db_pool, user.id, &password_hash).await?;
            }

            info!(user_id = %user.id, "Profile updated");
            success(200, UserResponse::from(user))
        }

        Route::DeleteProfile => {
            users::delete(&state.db_pool, caller.user_id).await?;
            info!(user_id = %caller.user_id, "Account deleted");
            no_content()
        }

        Route::List => {
            require_role(&caller, Role::Admin)?;
            let pagination = Pagination::from_request(event);
            let (rows, total) = users::list(&state.db_pool, pagination).await?;

            success(
                200,
                UserList {
                    users: rows.into_iter().map(UserResponse::from).collect(),
                    total,
                    page: pagination.page,
                    limit: pagination.limit,
                },
            )
        }

        Route::AdminUpdate(raw_id) => {
            require_role(&caller, Role::Admin)?;
            let target_id = parse_uuid(&raw_id, "user id")?;
            let request: AdminUpdateUserRequest = parse_json_body(event.body())?;

            if request.role.is_none() && request.is_active.is_none() {
                return Err(shared::Error::Validation("No changes provided".to_string()));
            }
            check_self_update(caller.user_id, target_id, &request)?;

            let user =
                users::admin_update(&state.db_pool, target_id, request.role, request.is_active)
                    .await?;

            info!(
                admin_id = %caller.user_id,
                user_id = %user.id,
                role = user.role.as_str(),
                is_active = user.is_active,
                "User updated by admin"
            );
            success(200, UserResponse::from(user))
        }
    }
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
        assert_eq!(Route::parse("GET", "/api/users/profile"), Some(Route::GetProfile));
        assert_eq!(Route::parse("DELETE", "/api/users/profile"), Some(Route::DeleteProfile));
        assert_eq!(Route::parse("GET", "/api/users"), Some(Route::List));
        assert_eq!(
            Route::parse("PUT", "/api/users/abc"),
            Some(Route::AdminUpdate("abc".to_string()))
        );
        assert_eq!(Route::parse("DELETE", "/api/users/abc"), None);
        assert_eq!(Route::parse("GET", "/api/users/profile/extra"), None);
    }

    fn password_change(current: Option<&str>) -> UpdateProfileRequest {
        UpdateProfileRequest {
            name: None,
            email: None,
            current_password: current.map(str::to_string),
            new_password: Some("N3wPassword".to_string()),
        }
    }

    #[tokio::test]
    async fn test_password_change_needs_current_password() {
        let hash = hash_password("0ldPassword", 4).await.unwrap();

        let err = check_current_password(&password_change(None), &hash).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        let err = check_current_password(&password_change(Some("")), &hash).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = check_current_password(&password_change(Some("Wr0ngPassword")), &hash)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(err.client_message(), "Current password is incorrect");

        assert!(check_current_password(&password_change(Some("0ldPassword")), &hash)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_name_change_skips_password_check() {
        let request = UpdateProfileRequest {
            name: Some("Erin".to_string()),
            email: None,
            current_password: None,
            new_password: None,
        };
        assert!(check_current_password(&request, "not-a-bcrypt-hash").await.is_ok());
    }

    #[test]
    fn test_admin_cannot_demote_or_deactivate_self() {
        let me = Uuid::new_v4();
        let demote = AdminUpdateUserRequest {
            role: Some(Role::User),
            is_active: None,
        };
        let deactivate = AdminUpdateUserRequest {
            role: None,
            is_active: Some(false),
        };

        assert_eq!(check_self_update(me, me, &demote).unwrap_err().status_code(), 400);
        assert_eq!(check_self_update(me, me, &deactivate).unwrap_err().status_code(), 400);
        assert!(check_self_update(me, Uuid::new_v4(), &demote).is_ok());
        assert!(check_self_update(me, Uuid::new_v4(), &deactivate).is_ok());

        let noop = AdminUpdateUserRequest {
            role: Some(Role::Admin),
            is_active: Some(true),
        };
        assert!(check_self_update(me, me, &noop).is_ok());
    }
}
