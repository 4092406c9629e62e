//! User persistence.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Role};
use crate::http::Pagination;
use crate::{Error, Result};

const USER_COLUMNS: &str = r#"
    id, email, password_hash, name, role, is_active, last_login,
    reset_password_token, reset_password_expires, created_at, updated_at
"#;

/// User row from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub reset_password_token: Option<String>,
    pub reset_password_expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    /// Unknown role strings degrade to the least-privileged role.
    pub fn role(&self) -> Role {
        Role::parse(&self.role).unwrap_or(Role::User)
    }

    pub fn identity(&self) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: self.id,
            email: self.email.clone(),
            role: self.role(),
        }
    }

    /// Whether `token` is the outstanding, unexpired reset token.
    pub fn reset_token_matches(&self, token: &str, now: DateTime<Utc>) -> bool {
        match (&self.reset_password_token, self.reset_password_expires) {
            (Some(stored), Some(expires)) => stored == token && expires > now,
            _ => false,
        }
    }
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRow>> {
    let query = format!("SELECT {} FROM users WHERE email = $1", USER_COLUMNS);
    Ok(sqlx::query_as::<_, UserRow>(&query)
        .bind(email)
        .fetch_optional(pool)
        .await?)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<UserRow>> {
    let query = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
    Ok(sqlx::query_as::<_, UserRow>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

/// Fetch a user or fail with 404.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<UserRow> {
    find_by_id(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))
}

pub async fn create(pool: &PgPool, email: &str, password_hash: &str, name: &str) -> Result<UserRow> {
    let query = format!(
        r#"
        INSERT INTO users (email, password_hash, name, role)
        VALUES ($1, $2, $3, 'user')
        RETURNING {}
        "#,
        USER_COLUMNS
    );
    sqlx::query_as::<_, UserRow>(&query)
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .fetch_one(pool)
        .await
        .map_err(|e| Error::from_db_unique(e, "Email already registered"))
}

pub async fn update_profile(
    pool: &PgPool,
    id: Uuid,
    name: Option<&str>,
    email: Option<&str>,
) -> Result<UserRow> {
    let query = format!(
        r#"
        UPDATE users
        SET name = COALESCE($2, name),
            email = COALESCE($3, email),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    );
    sqlx::query_as::<_, UserRow>(&query)
        .bind(id)
        .bind(name)
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::from_db_unique(e, "Email already in use"))?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))
}

/// Replace the password hash and void any outstanding reset token.
pub async fn update_password(pool: &PgPool, id: Uuid, password_hash: &str) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $2,
            reset_password_token = NULL,
            reset_password_expires = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(password_hash)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound("User not found".to_string()));
    }
    Ok(())
}

pub async fn set_reset_token(
    pool: &PgPool,
    id: Uuid,
    token: &str,
    expires: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE users
        SET reset_password_token = $2, reset_password_expires = $3, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(token)
    .bind(expires)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_last_login(pool: &PgPool, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn admin_update(
    pool: &PgPool,
    id: Uuid,
    role: Option<Role>,
    is_active: Option<bool>,
) -> Result<UserRow> {
    let query = format!(
        r#"
        UPDATE users
        SET role = COALESCE($2, role),
            is_active = COALESCE($3, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        USER_COLUMNS
    );
    sqlx::query_as::<_, UserRow>(&query)
        .bind(id)
        .bind(role.map(|r| r.as_str()))
        .bind(is_active)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("User not found".to_string()))
}

/// Delete a user; their documents go with them (`ON DELETE CASCADE`).
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<()> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound("User not found".to_string()));
    }
    Ok(())
}

pub async fn list(pool: &PgPool, pagination: Pagination) -> Result<(Vec<UserRow>, i64)> {
    let query = format!(
        "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        USER_COLUMNS
    );
    let users = sqlx::query_as::<_, UserRow>(&query)
        .bind(i64::from(pagination.limit))
        .bind(pagination.offset())
        .fetch_all(pool)
        .await?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;

    Ok((users, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row() -> UserRow {
        let now = Utc::now();
        UserRow {
            id: Uuid::new_v4(),
            email: "carol@example.com".to_string(),
            password_hash: "$2b$04$hash".to_string(),
            name: "Carol".to_string(),
            role: "admin".to_string(),
            is_active: true,
            last_login: None,
            reset_password_token: None,
            reset_password_expires: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_parsing() {
        let mut user = row();
        assert_eq!(user.role(), Role::Admin);
        user.role = "superuser".to_string();
        assert_eq!(user.role(), Role::User);
        assert_eq!(user.identity().user_id, user.id);
    }

    #[test]
    fn test_reset_token_matching() {
        let now = Utc::now();
        let mut user = row();
        assert!(!user.reset_token_matches("tok", now));

        user.reset_password_token = Some("tok".to_string());
        user.reset_password_expires = Some(now + Duration::minutes(30));
        assert!(user.reset_token_matches("tok", now));
        assert!(!user.reset_token_matches("other", now));
        assert!(!user.reset_token_matches("tok", now + Duration::hours(1)));
    }

    #[test]
    fn test_user_response_hides_secrets() {
        let mut user = row();
        user.reset_password_token = Some("tok".to_string());
        let json = serde_json::to_value(crate::models::UserResponse::from(user)).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("resetPasswordToken").is_none());
        assert_eq!(json["role"], "admin");
        assert_eq!(json["isActive"], true);
    }
}
