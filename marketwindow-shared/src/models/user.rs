/// User model and database operations
///
/// Every account carries exactly one role. Sellers own at most one shop,
/// buyers browse and follow shops, admins review shop verification.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE user_role AS ENUM ('admin', 'seller', 'buyer');
///
/// CREATE TABLE users (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     email VARCHAR(255) NOT NULL UNIQUE,      -- stored lowercase
///     username VARCHAR(80) NOT NULL UNIQUE,
///     password_hash VARCHAR(255) NOT NULL,
///     role user_role NOT NULL DEFAULT 'buyer',
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     last_login_at TIMESTAMPTZ
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::models::user::{CreateUser, User, UserRole};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let user = User::create(&pool, CreateUser {
///     email: "Buyer@Example.com".to_string(),
///     username: "first_buyer".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     role: UserRole::Buyer,
/// }).await?;
///
/// // Lookups are case-insensitive
/// let found = User::find_by_email(&pool, "buyer@example.com").await?;
/// assert_eq!(found.map(|u| u.id), Some(user.id));
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Reviews shop verification, moderates shops, manages categories
    Admin,

    /// Owns one shop and its products
    Seller,

    /// Browses verified shops and follows them
    Buyer,
}

impl UserRole {
    /// Converts role to string for storage and tokens
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Seller => "seller",
            UserRole::Buyer => "buyer",
        }
    }

    /// Whether the role may be chosen at public registration
    pub fn is_self_registrable(&self) -> bool {
        matches!(self, UserRole::Seller | UserRole::Buyer)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "seller" => Ok(UserRole::Seller),
            "buyer" => Ok(UserRole::Buyer),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// User account
///
/// Passwords are stored as Argon2id hashes, never in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,

    /// Email address, lowercase
    pub email: String,

    /// Public handle
    pub username: String,

    /// Argon2id password hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    /// Account role
    pub role: UserRole,

    /// Inactive accounts cannot log in
    pub is_active: bool,

    /// When the account was created
    pub created_at: DateTime<Utc>,

    /// When the account was last updated
    pub updated_at: DateTime<Utc>,

    /// When the user last logged in
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Input for creating a new user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Email address (normalized to lowercase on insert)
    pub email: String,

    /// Public handle
    pub username: String,

    /// Argon2id password hash (NOT plaintext password!)
    pub password_hash: String,

    /// Account role
    pub role: UserRole,
}

/// Normalizes an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

const USER_COLUMNS: &str = "id, email, username, password_hash, role, is_active, \
                            created_at, updated_at, last_login_at";

impl User {
    /// Creates a new user
    ///
    /// # Errors
    ///
    /// Returns a unique violation (`users_email_key` / `users_username_key`)
    /// if the email or username is taken.
    pub async fn create(pool: &PgPool, data: CreateUser) -> Result<Self, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, username, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(normalize_email(&data.email))
        .bind(data.username.trim())
        .bind(data.password_hash)
        .bind(data.role)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    /// Finds a user by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Whether the account exists and is active
    pub async fn account_active(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let active: Option<bool> = sqlx::query_scalar("SELECT is_active FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(active.unwrap_or(false))
    }

    /// Finds a user by email address (case-insensitive)
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Replaces the password hash
    ///
    /// Takes a connection so a password reset can commit together with the
    /// consumption of its one-time code.
    pub async fn set_password_hash(
        conn: &mut PgConnection,
        id: Uuid,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Activates or deactivates an account
    pub async fn set_active(pool: &PgPool, id: Uuid, is_active: bool) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET is_active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Updates the last login timestamp
    pub async fn update_last_login(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists users, optionally filtered by role, newest first
    pub async fn list(
        pool: &PgPool,
        role: Option<UserRole>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let users = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::user_role IS NULL OR role = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(role)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(users)
    }

    /// Whether any admin account exists
    pub async fn admin_exists(pool: &PgPool) -> Result<bool, sqlx::Error> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE role = 'admin')")
                .fetch_one(pool)
                .await?;

        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [UserRole::Admin, UserRole::Seller, UserRole::Buyer] {
            assert_eq!(role.as_str().parse::<UserRole>(), Ok(role));
        }
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_admin_is_not_self_registrable() {
        assert!(!UserRole::Admin.is_self_registrable());
        assert!(UserRole::Seller.is_self_registrable());
        assert!(UserRole::Buyer.is_self_registrable());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Shop@Example.COM "), "shop@example.com");
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let user = User {
            id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            username: "a".to_string(),
            password_hash: "$argon2id$secret".to_string(),
            role: UserRole::Buyer,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_login_at: None,
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "buyer");
    }
}
