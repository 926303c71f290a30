/// One-time code issuing and validation
///
/// An [`OtpIssuer`] hands out 6-digit codes bound to a subject (a shop for
/// verification, a user for password reset) and a [`OtpPurpose`]. Codes are
/// stored only as an HMAC (see [`code`]), expire after a fixed TTL, and are
/// single use.
///
/// # Invariants
///
/// - At most one live code per (subject, purpose). Issuing supersedes the
///   previous code. A transaction-scoped advisory lock serializes issuers and
///   the `otps_one_active` partial unique index backs it up.
/// - A code is consumed at most once (conditional `UPDATE`), so a replay of a
///   correct code fails with [`OtpError::AlreadyConsumed`].
/// - Failed attempts are counted; reaching the limit invalidates the code.
///
/// # Transactions
///
/// Every operation runs on the caller's connection. Validation failures still
/// write bookkeeping (attempt counts, expiry invalidation), so callers must
/// commit the transaction before surfacing an [`OtpError`], and roll back only
/// on database errors.
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::models::otp::OtpPurpose;
/// use marketwindow_shared::otp::OtpIssuer;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, shop_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
/// let issuer = OtpIssuer::new(b"a-server-secret-of-at-least-32-bytes!", 10, 5)?;
///
/// let mut tx = pool.begin().await?;
/// let issued = issuer
///     .issue(&mut tx, shop_id, OtpPurpose::ShopVerification, Some("+233201234567"))
///     .await?;
/// tx.commit().await?;
///
/// let mut tx = pool.begin().await?;
/// let result = issuer
///     .validate(&mut tx, shop_id, OtpPurpose::ShopVerification, issued.code())
///     .await;
/// tx.commit().await?;
/// assert!(result.is_ok());
/// # Ok(())
/// # }
/// ```

pub mod code;
pub mod delivery;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgConnection;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::is_unique_violation;
use crate::models::otp::{Otp, OtpPurpose};

/// Default lifetime of a code
pub const DEFAULT_TTL_MINUTES: i64 = 10;

/// Default number of failed validations before a code is locked
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

/// OTP errors
#[derive(Debug, Error)]
pub enum OtpError {
    #[error("No code has been issued")]
    NotFound,

    #[error("Code has expired")]
    Expired,

    #[error("Code has already been used")]
    AlreadyConsumed,

    #[error("Code does not match ({remaining_attempts} attempts left)")]
    Mismatch { remaining_attempts: i32 },

    #[error("Too many failed attempts; request a new code")]
    TooManyAttempts,

    #[error("Another code was issued concurrently")]
    Conflict,

    #[error("Invalid OTP configuration: {0}")]
    InvalidConfig(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A freshly issued code
///
/// The plaintext code exists only here, long enough to hand it to an
/// [`OtpDelivery`](delivery::OtpDelivery). `Debug` output redacts it.
pub struct IssuedOtp {
    pub otp: Otp,
    code: String,
}

impl IssuedOtp {
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Debug for IssuedOtp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedOtp")
            .field("otp", &self.otp)
            .field("code", &"******")
            .finish()
    }
}

/// Where the newest code for a subject stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Standing {
    Live,
    Consumed,
    Exhausted,
    Invalidated,
    Expired,
}

fn standing(otp: &Otp, now: DateTime<Utc>, max_attempts: i32) -> Standing {
    if otp.is_consumed() {
        Standing::Consumed
    } else if otp.is_invalidated() && otp.attempts >= max_attempts {
        Standing::Exhausted
    } else if otp.is_invalidated() {
        Standing::Invalidated
    } else if otp.is_expired_at(now) {
        Standing::Expired
    } else {
        Standing::Live
    }
}

/// Issues and validates one-time codes
#[derive(Clone)]
pub struct OtpIssuer {
    secret: Arc<[u8]>,
    ttl: Duration,
    max_attempts: i32,
}

impl fmt::Debug for OtpIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OtpIssuer")
            .field("ttl_minutes", &self.ttl.num_minutes())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl OtpIssuer {
    /// Creates an issuer keyed by the server secret
    ///
    /// # Errors
    ///
    /// Rejects an empty secret, a non-positive TTL or attempt limit.
    pub fn new(secret: &[u8], ttl_minutes: i64, max_attempts: i32) -> Result<Self, OtpError> {
        if secret.is_empty() {
            return Err(OtpError::InvalidConfig("secret must not be empty".to_string()));
        }
        if ttl_minutes <= 0 {
            return Err(OtpError::InvalidConfig("ttl must be positive".to_string()));
        }
        if max_attempts <= 0 {
            return Err(OtpError::InvalidConfig("max attempts must be positive".to_string()));
        }

        Ok(OtpIssuer {
            secret: Arc::from(secret),
            ttl: Duration::minutes(ttl_minutes),
            max_attempts,
        })
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.num_minutes()
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_attempts
    }

    /// Issues a new code, superseding any live one for the same subject
    pub async fn issue(
        &self,
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
        destination: Option<&str>,
    ) -> Result<IssuedOtp, OtpError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("otp:{}:{}", purpose, subject_id))
            .execute(&mut *conn)
            .await?;

        let superseded = Otp::invalidate_live(&mut *conn, subject_id, purpose).await?;

        let id = Uuid::new_v4();
        let plaintext = code::generate_code();
        let code_hash = code::hash_code(&self.secret, id, &plaintext)
            .map_err(|e| OtpError::InvalidConfig(e.to_string()))?;
        let issued_at = Utc::now();

        let otp = Otp::insert(
            &mut *conn,
            id,
            subject_id,
            purpose,
            &code_hash,
            destination,
            issued_at,
            issued_at + self.ttl,
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OtpError::Conflict
            } else {
                OtpError::Database(e)
            }
        })?;

        tracing::info!(
            otp_id = %otp.id,
            subject_id = %subject_id,
            purpose = %purpose,
            superseded,
            expires_at = %otp.expires_at,
            "One-time code issued"
        );

        Ok(IssuedOtp { otp, code: plaintext })
    }

    /// Validates and consumes a code
    ///
    /// Looks only at the newest code for the subject; superseded codes never
    /// validate.
    pub async fn validate(
        &self,
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
        submitted: &str,
    ) -> Result<Otp, OtpError> {
        let otp = Otp::lock_latest(&mut *conn, subject_id, purpose)
            .await?
            .ok_or(OtpError::NotFound)?;

        match standing(&otp, Utc::now(), self.max_attempts) {
            Standing::Consumed => return Err(OtpError::AlreadyConsumed),
            Standing::Exhausted => return Err(OtpError::TooManyAttempts),
            Standing::Invalidated => return Err(OtpError::Expired),
            Standing::Expired => {
                Otp::invalidate(&mut *conn, otp.id).await?;
                tracing::debug!(otp_id = %otp.id, "Expired code invalidated on use");
                return Err(OtpError::Expired);
            }
            Standing::Live => {}
        }

        if !code::verify_code(&self.secret, otp.id, submitted.trim(), &otp.code_hash) {
            let failed = Otp::record_failure(&mut *conn, otp.id, self.max_attempts).await?;
            tracing::warn!(
                otp_id = %otp.id,
                subject_id = %subject_id,
                purpose = %purpose,
                attempts = failed.attempts,
                "One-time code mismatch"
            );
            return Err(OtpError::Mismatch {
                remaining_attempts: (self.max_attempts - failed.attempts).max(0),
            });
        }

        if !Otp::consume(&mut *conn, otp.id).await? {
            return Err(OtpError::AlreadyConsumed);
        }

        tracing::info!(otp_id = %otp.id, subject_id = %subject_id, purpose = %purpose, "One-time code consumed");

        Ok(Otp {
            consumed_at: Some(Utc::now()),
            ..otp
        })
    }

    /// The live, unexpired code for a subject, if any
    pub async fn active(
        &self,
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<Option<Otp>, OtpError> {
        let now = Utc::now();
        let otp = Otp::find_live(conn, subject_id, purpose)
            .await?
            .filter(|otp| otp.is_active_at(now));

        Ok(otp)
    }

    /// Invalidates any live code for a subject
    pub async fn invalidate_active(
        &self,
        conn: &mut PgConnection,
        subject_id: Uuid,
        purpose: OtpPurpose,
    ) -> Result<u64, OtpError> {
        let count = Otp::invalidate_live(conn, subject_id, purpose).await?;
        if count > 0 {
            tracing::info!(subject_id = %subject_id, purpose = %purpose, count, "One-time codes invalidated");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn otp(now: DateTime<Utc>) -> Otp {
        Otp {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            purpose: OtpPurpose::ShopVerification,
            code_hash: String::new(),
            destination: None,
            attempts: 0,
            issued_at: now,
            expires_at: now + Duration::minutes(10),
            consumed_at: None,
            invalidated_at: None,
        }
    }

    #[test]
    fn test_issuer_rejects_bad_config() {
        assert!(matches!(OtpIssuer::new(b"", 10, 5), Err(OtpError::InvalidConfig(_))));
        assert!(matches!(OtpIssuer::new(b"secret", 0, 5), Err(OtpError::InvalidConfig(_))));
        assert!(matches!(OtpIssuer::new(b"secret", 10, 0), Err(OtpError::InvalidConfig(_))));

        let issuer = OtpIssuer::new(b"secret", DEFAULT_TTL_MINUTES, DEFAULT_MAX_ATTEMPTS).unwrap();
        assert_eq!(issuer.ttl_minutes(), 10);
        assert_eq!(issuer.max_attempts(), 5);
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let issuer = OtpIssuer::new(b"super-secret-value", 10, 5).unwrap();
        assert!(!format!("{:?}", issuer).contains("super-secret-value"));

        let issued = IssuedOtp {
            otp: otp(Utc::now()),
            code: "987654".to_string(),
        };
        assert!(!format!("{:?}", issued).contains("987654"));
        assert_eq!(issued.code(), "987654");
    }

    #[test]
    fn test_standing_live_and_expired() {
        let now = Utc::now();
        let code = otp(now);
        assert_eq!(standing(&code, now, 5), Standing::Live);
        assert_eq!(standing(&code, now + Duration::minutes(10), 5), Standing::Expired);
        assert_eq!(standing(&code, now + Duration::minutes(11), 5), Standing::Expired);
    }

    #[test]
    fn test_standing_consumed_wins() {
        let now = Utc::now();
        let mut code = otp(now);
        code.consumed_at = Some(now);
        assert_eq!(standing(&code, now + Duration::hours(1), 5), Standing::Consumed);
    }

    #[test]
    fn test_standing_exhausted_vs_invalidated() {
        let now = Utc::now();
        let mut code = otp(now);
        code.invalidated_at = Some(now);
        assert_eq!(standing(&code, now, 5), Standing::Invalidated);

        code.attempts = 5;
        assert_eq!(standing(&code, now, 5), Standing::Exhausted);
    }

    #[test]
    fn test_mismatch_message_reports_remaining_attempts() {
        let err = OtpError::Mismatch { remaining_attempts: 2 };
        assert_eq!(err.to_string(), "Code does not match (2 attempts left)");
    }
}
