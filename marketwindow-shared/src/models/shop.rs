/// Shop model and database operations
///
/// A shop belongs to exactly one seller. Its `verification_status` is the
/// projection of its latest verification cycle (see
/// [`shop_verification`](super::shop_verification)) and is only written by the
/// [`verification`](crate::verification) flow, in the same transaction as the
/// cycle row. Buyers only ever see active shops whose status is `verified`.
///
/// # State Machine
///
/// ```text
/// pending ──(admin sends OTP)──> otp_sent ──(seller confirms code)──> verified
///    │                              │
///    └──────(admin rejects)─────────┴──> rejected ──(seller resubmits)──> pending (new cycle)
/// ```
///
/// # Schema
///
/// ```sql
/// CREATE TYPE verification_status AS ENUM ('pending', 'otp_sent', 'verified', 'rejected');
///
/// CREATE TABLE shops (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     owner_id UUID NOT NULL UNIQUE REFERENCES users(id),
///     name VARCHAR(120) NOT NULL,
///     description TEXT,
///     address VARCHAR(255),
///     region VARCHAR(80),
///     district VARCHAR(80),
///     town VARCHAR(80),
///     phone VARCHAR(32),
///     email VARCHAR(255),
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     promoted BOOLEAN NOT NULL DEFAULT FALSE,
///     verification_status verification_status NOT NULL DEFAULT 'pending',
///     verified_at TIMESTAMPTZ,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::like_pattern;

/// Verification status of a shop (and of each verification cycle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "verification_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Submitted, waiting for an admin to send a code
    Pending,

    /// A code was sent to the shop contact; waiting for the seller to confirm it
    OtpSent,

    /// Terminal: code confirmed, shop visible to buyers
    Verified,

    /// Terminal for the cycle: the seller may resubmit, opening a new cycle
    Rejected,
}

impl VerificationStatus {
    /// Converts status to string for storage and filters
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::OtpSent => "otp_sent",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    /// Checks if status ends a cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, VerificationStatus::Verified | VerificationStatus::Rejected)
    }

    /// Checks if a cycle in this status is still open
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Checks if a transition within one cycle is valid
    ///
    /// `OtpSent -> OtpSent` is a re-issue of the code. Leaving `Rejected`
    /// never happens inside a cycle; resubmission opens a new one.
    pub fn can_transition_to(&self, target: VerificationStatus) -> bool {
        match (self, target) {
            (VerificationStatus::Pending, VerificationStatus::OtpSent) => true,
            (VerificationStatus::Pending, VerificationStatus::Rejected) => true,

            (VerificationStatus::OtpSent, VerificationStatus::OtpSent) => true,
            (VerificationStatus::OtpSent, VerificationStatus::Verified) => true,
            (VerificationStatus::OtpSent, VerificationStatus::Rejected) => true,

            _ => false,
        }
    }

    /// Whether a seller may open a new cycle from this status
    pub fn can_resubmit(&self) -> bool {
        matches!(self, VerificationStatus::Rejected)
    }
}

impl std::str::FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "otp_sent" => Ok(VerificationStatus::OtpSent),
            "verified" => Ok(VerificationStatus::Verified),
            "rejected" => Ok(VerificationStatus::Rejected),
            other => Err(format!("Unknown verification status: {}", other)),
        }
    }
}

/// Seller shop
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shop {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub town: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,

    /// Soft on/off switch; inactive shops are hidden from buyers
    pub is_active: bool,

    /// Promoted shops sort first in buyer listings
    pub promoted: bool,

    /// Projection of the latest verification cycle
    pub verification_status: VerificationStatus,

    /// Set exactly when status is `verified`
    pub verified_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shop {
    /// Derived from the status; there is no stored flag to drift
    pub fn is_verified(&self) -> bool {
        self.verification_status == VerificationStatus::Verified
    }

    /// Whether buyers may see this shop
    pub fn is_visible_to_buyers(&self) -> bool {
        self.is_active && self.is_verified()
    }

    /// Where a verification code for this shop is sent
    ///
    /// Phone wins over email, matching how sellers are reached first.
    pub fn otp_destination(&self) -> Option<&str> {
        self.phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| self.email.as_deref().filter(|e| !e.trim().is_empty()))
    }
}

/// Input for creating a shop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateShop {
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub town: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Editable shop details
///
/// `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateShop {
    pub name: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub town: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Sort order for buyer listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShopSort {
    /// Alphabetical
    #[default]
    Name,

    /// Most recently updated first
    LastUpdated,

    /// Promoted shops first, then by name
    Promoted,
}

impl ShopSort {
    fn order_by(&self) -> &'static str {
        match self {
            ShopSort::Name => "s.name ASC",
            ShopSort::LastUpdated => "s.updated_at DESC",
            ShopSort::Promoted => "s.promoted DESC, s.name ASC",
        }
    }
}

/// Filters for the admin shop listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminShopFilter {
    pub status: Option<VerificationStatus>,
    pub is_active: Option<bool>,
    pub search: Option<String>,
}

/// Filters for the buyer shop listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VisibleShopFilter {
    pub search: Option<String>,
    pub region: Option<String>,
    #[serde(default)]
    pub sort: ShopSort,
}

/// Buyer-facing listing row
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShopListing {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub town: Option<String>,
    pub promoted: bool,
    pub verified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub product_count: i64,
    pub follower_count: i64,
}

const SHOP_COLUMNS: &str = "id, owner_id, name, description, address, region, district, town, \
                            phone, email, is_active, promoted, verification_status, verified_at, \
                            created_at, updated_at";

impl Shop {
    /// Inserts a shop in `pending` status
    ///
    /// Runs on the caller's transaction; the verification flow opens cycle 1
    /// alongside it.
    ///
    /// # Errors
    ///
    /// Returns a unique violation on `shops_owner_id_key` if the seller
    /// already owns a shop.
    pub async fn create(
        conn: &mut PgConnection,
        owner_id: Uuid,
        data: CreateShop,
    ) -> Result<Self, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            r#"
            INSERT INTO shops (owner_id, name, description, address, region, district, town, phone, email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {SHOP_COLUMNS}
            "#
        ))
        .bind(owner_id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.address)
        .bind(data.region)
        .bind(data.district)
        .bind(data.town)
        .bind(data.phone)
        .bind(data.email)
        .fetch_one(conn)
        .await?;

        Ok(shop)
    }

    /// Finds a shop by ID
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            "SELECT {SHOP_COLUMNS} FROM shops WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(shop)
    }

    /// Finds the shop owned by a seller
    pub async fn find_by_owner(pool: &PgPool, owner_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            "SELECT {SHOP_COLUMNS} FROM shops WHERE owner_id = $1"
        ))
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

        Ok(shop)
    }

    /// Locks a shop row for the rest of the transaction
    ///
    /// Verification transitions take this lock so two admins (or an admin and
    /// the seller) cannot interleave on the same cycle.
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            "SELECT {SHOP_COLUMNS} FROM shops WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(shop)
    }

    /// Finds a shop visible to buyers (active and verified)
    pub async fn find_visible(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            r#"
            SELECT {SHOP_COLUMNS} FROM shops
            WHERE id = $1 AND is_active AND verification_status = 'verified'
            "#
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(shop)
    }

    /// Updates seller-editable details
    pub async fn update_details(
        pool: &PgPool,
        id: Uuid,
        data: UpdateShop,
    ) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            r#"
            UPDATE shops SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                address = COALESCE($4, address),
                region = COALESCE($5, region),
                district = COALESCE($6, district),
                town = COALESCE($7, town),
                phone = COALESCE($8, phone),
                email = COALESCE($9, email),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SHOP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(data.name)
        .bind(data.description)
        .bind(data.address)
        .bind(data.region)
        .bind(data.district)
        .bind(data.town)
        .bind(data.phone)
        .bind(data.email)
        .fetch_optional(pool)
        .await?;

        Ok(shop)
    }

    /// Writes the verification projection
    ///
    /// Only the verification flow calls this, inside the transaction that
    /// writes the matching cycle row.
    pub async fn set_verification_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: VerificationStatus,
    ) -> Result<Self, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            r#"
            UPDATE shops SET
                verification_status = $2,
                verified_at = CASE WHEN $2 = 'verified'::verification_status THEN NOW() ELSE NULL END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SHOP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .fetch_one(conn)
        .await?;

        Ok(shop)
    }

    /// Activates or deactivates a shop (admin moderation)
    pub async fn set_active(pool: &PgPool, id: Uuid, is_active: bool) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            r#"
            UPDATE shops SET is_active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {SHOP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(pool)
        .await?;

        Ok(shop)
    }

    /// Sets or clears the promoted flag
    pub async fn set_promoted(pool: &PgPool, id: Uuid, promoted: bool) -> Result<Option<Self>, sqlx::Error> {
        let shop = sqlx::query_as::<_, Shop>(&format!(
            r#"
            UPDATE shops SET promoted = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {SHOP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(promoted)
        .fetch_optional(pool)
        .await?;

        Ok(shop)
    }

    /// Admin listing with status, activity and name/email search filters
    pub async fn list_for_admin(
        pool: &PgPool,
        filter: &AdminShopFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let shops = sqlx::query_as::<_, Shop>(&format!(
            r#"
            SELECT {SHOP_COLUMNS} FROM shops
            WHERE ($1::verification_status IS NULL OR verification_status = $1)
              AND ($2::boolean IS NULL OR is_active = $2)
              AND ($3::text IS NULL OR name ILIKE $3 OR email ILIKE $3 OR phone ILIKE $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.status)
        .bind(filter.is_active)
        .bind(like_pattern(&filter.search))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(shops)
    }

    /// Shops with an open cycle, oldest submission first
    pub async fn list_awaiting_review(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        let shops = sqlx::query_as::<_, Shop>(&format!(
            r#"
            SELECT {SHOP_COLUMNS} FROM shops
            WHERE verification_status IN ('pending', 'otp_sent')
            ORDER BY updated_at ASC
            "#
        ))
        .fetch_all(pool)
        .await?;

        Ok(shops)
    }

    /// Buyer listing: active, verified shops only
    pub async fn list_visible(
        pool: &PgPool,
        filter: &VisibleShopFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShopListing>, sqlx::Error> {
        let query = format!(
            r#"
            SELECT s.id, s.name, s.description, s.region, s.district, s.town, s.promoted,
                   s.verified_at, s.updated_at,
                   (SELECT COUNT(*) FROM products p WHERE p.shop_id = s.id AND p.is_active) AS product_count,
                   (SELECT COUNT(*) FROM shop_follows f WHERE f.shop_id = s.id) AS follower_count
            FROM shops s
            WHERE s.is_active
              AND s.verification_status = 'verified'
              AND ($1::text IS NULL OR s.name ILIKE $1 OR s.description ILIKE $1)
              AND ($2::text IS NULL OR s.region ILIKE $2)
            ORDER BY {}
            LIMIT $3 OFFSET $4
            "#,
            filter.sort.order_by()
        );

        let shops = sqlx::query_as::<_, ShopListing>(&query)
            .bind(like_pattern(&filter.search))
            .bind(filter.region.as_deref().map(str::trim).filter(|r| !r.is_empty()))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        Ok(shops)
    }

    /// Counts buyer-visible shops for the same filter
    pub async fn count_visible(pool: &PgPool, filter: &VisibleShopFilter) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM shops s
            WHERE s.is_active
              AND s.verification_status = 'verified'
              AND ($1::text IS NULL OR s.name ILIKE $1 OR s.description ILIKE $1)
              AND ($2::text IS NULL OR s.region ILIKE $2)
            "#,
        )
        .bind(like_pattern(&filter.search))
        .bind(filter.region.as_deref().map(str::trim).filter(|r| !r.is_empty()))
        .fetch_one(pool)
        .await?;

        Ok(count)
    }
}
