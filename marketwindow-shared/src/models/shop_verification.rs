/// Shop verification cycles
///
/// Each submission of a shop for verification is a cycle. A cycle moves
/// through the [`VerificationStatus`] state machine once; when it ends in
/// `rejected` the row is left as history and the seller's resubmission opens
/// cycle `n + 1`. Status changes are conditional updates (`WHERE status = ...`)
/// that return `None` when the cycle is no longer in the expected state.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE shop_verifications (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     shop_id UUID NOT NULL REFERENCES shops(id),
///     cycle INTEGER NOT NULL CHECK (cycle > 0),
///     status verification_status NOT NULL DEFAULT 'pending',
///     submitted_by UUID NOT NULL REFERENCES users(id),
///     submitted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     otp_sent_by UUID REFERENCES users(id),
///     otp_sent_at TIMESTAMPTZ,
///     decided_by UUID REFERENCES users(id),
///     decided_at TIMESTAMPTZ,
///     rejection_reason TEXT,
///     notes TEXT,
///     UNIQUE (shop_id, cycle)
/// );
///
/// CREATE UNIQUE INDEX shop_verifications_one_open
///     ON shop_verifications (shop_id) WHERE status IN ('pending', 'otp_sent');
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::shop::VerificationStatus;

/// One verification cycle of a shop
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShopVerification {
    pub id: Uuid,
    pub shop_id: Uuid,

    /// 1 for the first submission, incremented on each resubmission
    pub cycle: i32,

    pub status: VerificationStatus,
    pub submitted_by: Uuid,
    pub submitted_at: DateTime<Utc>,
    pub otp_sent_by: Option<Uuid>,
    pub otp_sent_at: Option<DateTime<Utc>>,

    /// Admin who rejected, or the seller whose code confirmation verified
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,

    /// Free-form admin notes
    pub notes: Option<String>,
}

const CYCLE_COLUMNS: &str = "id, shop_id, cycle, status, submitted_by, submitted_at, otp_sent_by, \
                             otp_sent_at, decided_by, decided_at, rejection_reason, notes";

impl ShopVerification {
    /// Opens the next cycle for a shop in `pending`
    ///
    /// # Errors
    ///
    /// Returns a unique violation on `shop_verifications_one_open` if a cycle
    /// is already open.
    pub async fn open(
        conn: &mut PgConnection,
        shop_id: Uuid,
        submitted_by: Uuid,
    ) -> Result<Self, sqlx::Error> {
        let cycle = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            INSERT INTO shop_verifications (shop_id, cycle, submitted_by)
            VALUES (
                $1,
                COALESCE((SELECT MAX(cycle) FROM shop_verifications WHERE shop_id = $1), 0) + 1,
                $2
            )
            RETURNING {CYCLE_COLUMNS}
            "#
        ))
        .bind(shop_id)
        .bind(submitted_by)
        .fetch_one(conn)
        .await?;

        Ok(cycle)
    }

    /// Latest cycle of a shop
    pub async fn latest(conn: &mut PgConnection, shop_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let cycle = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            SELECT {CYCLE_COLUMNS} FROM shop_verifications
            WHERE shop_id = $1
            ORDER BY cycle DESC
            LIMIT 1
            "#
        ))
        .bind(shop_id)
        .fetch_optional(conn)
        .await?;

        Ok(cycle)
    }

    /// All cycles of a shop, newest first
    pub async fn history(pool: &PgPool, shop_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let cycles = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            SELECT {CYCLE_COLUMNS} FROM shop_verifications
            WHERE shop_id = $1
            ORDER BY cycle DESC
            "#
        ))
        .bind(shop_id)
        .fetch_all(pool)
        .await?;

        Ok(cycles)
    }

    /// pending | otp_sent -> otp_sent
    pub async fn mark_otp_sent(
        conn: &mut PgConnection,
        id: Uuid,
        admin_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let cycle = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            UPDATE shop_verifications
            SET status = 'otp_sent', otp_sent_by = $2, otp_sent_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'otp_sent')
            RETURNING {CYCLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(admin_id)
        .fetch_optional(conn)
        .await?;

        Ok(cycle)
    }

    /// otp_sent -> verified
    pub async fn mark_verified(
        conn: &mut PgConnection,
        id: Uuid,
        confirmed_by: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let cycle = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            UPDATE shop_verifications
            SET status = 'verified', decided_by = $2, decided_at = NOW()
            WHERE id = $1 AND status = 'otp_sent'
            RETURNING {CYCLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(confirmed_by)
        .fetch_optional(conn)
        .await?;

        Ok(cycle)
    }

    /// pending | otp_sent -> rejected
    pub async fn mark_rejected(
        conn: &mut PgConnection,
        id: Uuid,
        admin_id: Uuid,
        reason: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let cycle = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            UPDATE shop_verifications
            SET status = 'rejected', decided_by = $2, decided_at = NOW(), rejection_reason = $3
            WHERE id = $1 AND status IN ('pending', 'otp_sent')
            RETURNING {CYCLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(admin_id)
        .bind(reason)
        .fetch_optional(conn)
        .await?;

        Ok(cycle)
    }

    /// Replaces the admin notes on a cycle
    pub async fn set_notes(
        conn: &mut PgConnection,
        id: Uuid,
        notes: Option<&str>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let cycle = sqlx::query_as::<_, ShopVerification>(&format!(
            r#"
            UPDATE shop_verifications SET notes = $2
            WHERE id = $1
            RETURNING {CYCLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(notes)
        .fetch_optional(conn)
        .await?;

        Ok(cycle)
    }
}
