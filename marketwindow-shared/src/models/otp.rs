/// One-time code rows
///
/// Only the HMAC of a code is stored. The issuing and validation rules live in
/// [`crate::otp`]; this module is plain row access.
///
/// # Schema
///
/// ```sql
/// CREATE TYPE otp_purpose AS ENUM ('shop_verification', 'password_reset');
///
/// CREATE TABLE otps (
///     id UUID PRIMARY KEY,
///     subject_id UUID NOT NULL,
///     purpose otp_purpose NOT NULL,
///     code_hash VARCHAR(128) NOT NULL,
///     destination VARCHAR(255),
///     attempts INTEGER NOT NULL DEFAULT 0,
///     issued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     expires_at TIMESTAMPTZ NOT NULL,
///     consumed_at TIMESTAMPTZ,
///     invalidated_at TIMESTAMPTZ
/// );
///
/// CREATE UNIQUE INDEX otps_one_active ON otps (subject_id, purpose)
///     WHERE consumed_at IS NULL AND invalidated_at IS NULL;
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use std::fmt;
use uuid::Uuid;

/// What a code authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "otp_purpose", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    /// Subject is a shop id
    ShopVerification,

    /// Subject is a user id
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::ShopVerification => "shop_verification",
            OtpPurpose::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Otp {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub purpose: OtpPurpose,
    #[serde(skip_serializing)]
    pub code_hash: String,
    pub destination: Option<String>,
    pub attempts: i32,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl Otp {
    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Not consumed, not invalidated, not expired
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_consumed() && !self.is_invalidated() && !self.is_expired_at(now)
    }
}

const OTP_COLUMNS: &str = "id, subject_id, purpose, code_hash, destination, attempts, issued_at, \
                           expires_at, consumed_at, invalidated_at";

impl Otp {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        conn: &mut PgConnection,
        id: Uuid,
        subject_id: Uuid,
        purpose: OtpPurpose,
        code_hash: &str,
        destination: Option<&str>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error> {
        let otp = sqlx::query_as::<_, Otp>(&format!(
            r#"
            INSERT INTO otps (id, subject_id, purpose, code_hash, destination, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {OTP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(subject_id)
        .bind(purpose)
        .bind(code_hash)
        .bind(destination)
        .bind(issued_at)
        .bind(expires_at)
        .fetch_one(conn)
        .await?;

        Ok(otp)
    }

    /// Newest code for a subject, locked for the rest of the transaction
    pub async fn lock_latest(
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<Self>, sqlx::Error> {
        let otp = sqlx::query_as::<_, Otp>(&format!(
            r#"
            SELECT {OTP_COLUMNS} FROM otps
            WHERE subject_id = $1 AND purpose = $2
            ORDER BY issued_at DESC, id DESC
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(subject_id)
        .bind(purpose)
        .fetch_optional(conn)
        .await?;

        Ok(otp)
    }

    /// Live (not consumed, not invalidated) code for a subject
    pub async fn find_live(
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<Self>, sqlx::Error> {
        let otp = sqlx::query_as::<_, Otp>(&format!(
            r#"
            SELECT {OTP_COLUMNS} FROM otps
            WHERE subject_id = $1 AND purpose = $2
              AND consumed_at IS NULL AND invalidated_at IS NULL
            "#
        ))
        .bind(subject_id)
        .bind(purpose)
        .fetch_optional(conn)
        .await?;

        Ok(otp)
    }

    /// Invalidates every live code for a subject, returning how many
    pub async fn invalidate_live(
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE otps SET invalidated_at = NOW()
            WHERE subject_id = $1 AND purpose = $2
              AND consumed_at IS NULL AND invalidated_at IS NULL
            "#,
        )
        .bind(subject_id)
        .bind(purpose)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn invalidate(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE otps SET invalidated_at = NOW() WHERE id = $1 AND consumed_at IS NULL AND invalidated_at IS NULL",
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts a failed attempt, invalidating the code once `max_attempts` is reached
    pub async fn record_failure(
        conn: &mut PgConnection,
        id: Uuid,
        max_attempts: i32,
    ) -> Result<Self, sqlx::Error> {
        let otp = sqlx::query_as::<_, Otp>(&format!(
            r#"
            UPDATE otps SET
                attempts = attempts + 1,
                invalidated_at = CASE WHEN attempts + 1 >= $2 THEN NOW() ELSE invalidated_at END
            WHERE id = $1
            RETURNING {OTP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(max_attempts)
        .fetch_one(conn)
        .await?;

        Ok(otp)
    }

    /// Marks a code consumed; `false` if it was no longer live
    pub async fn consume(conn: &mut PgConnection, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE otps SET consumed_at = NOW() WHERE id = $1 AND consumed_at IS NULL AND invalidated_at IS NULL",
        )
        .bind(id)
        .execute(conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
