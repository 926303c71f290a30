/// Shop verification flow
///
/// Drives the [`VerificationStatus`] state machine for a shop. Each call runs
/// in one transaction holding a `FOR UPDATE` lock on the shop, writes the
/// current [`ShopVerification`] cycle and the shop's status projection
/// together, and re-checks the transition after taking the lock.
///
/// | Operation   | Actor  | From                  | To                     |
/// |-------------|--------|-----------------------|------------------------|
/// | create_shop | seller | (none)                | pending, cycle 1       |
/// | send_otp    | admin  | pending, otp_sent     | otp_sent               |
/// | confirm     | seller | otp_sent              | verified               |
/// | reject      | admin  | pending, otp_sent     | rejected               |
/// | resubmit    | seller | rejected              | pending, cycle n + 1   |
///
/// `confirm` succeeds only when the shop's code validates; the consumption of
/// the code and the status change commit together. `reject` invalidates any
/// live code so it can no longer be confirmed.

use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::is_unique_violation;
use crate::models::otp::{Otp, OtpPurpose};
use crate::models::shop::{CreateShop, Shop, VerificationStatus};
use crate::models::shop_verification::ShopVerification;
use crate::otp::delivery::{DeliveryError, OtpDelivery, OtpMessage};
use crate::otp::{OtpError, OtpIssuer};

/// Verification errors
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Shop not found")]
    ShopNotFound,

    #[error("Seller already owns a shop")]
    ShopAlreadyExists,

    #[error("Cannot move verification from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Shop has no phone or email to send a code to")]
    NoDestination,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error("Code delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Checks a transition within a cycle
pub fn check_transition(
    from: VerificationStatus,
    to: VerificationStatus,
) -> Result<(), VerificationError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(VerificationError::InvalidTransition {
            from: from.as_str(),
            to: to.as_str(),
        })
    }
}

/// Result of an admin sending a code
#[derive(Debug, Clone, Serialize)]
pub struct CodeSent {
    pub shop: Shop,
    pub cycle: ShopVerification,
    pub otp: Otp,
}

/// Seller-facing view of where verification stands
#[derive(Debug, Clone, Serialize)]
pub struct VerificationOverview {
    pub shop: Shop,
    pub current_cycle: Option<ShopVerification>,

    /// Live code metadata (never the code)
    pub active_code: Option<Otp>,
}

async fn lock_shop(conn: &mut PgConnection, shop_id: Uuid) -> Result<Shop, VerificationError> {
    Shop::lock(conn, shop_id)
        .await?
        .ok_or(VerificationError::ShopNotFound)
}

async fn current_cycle(
    conn: &mut PgConnection,
    shop_id: Uuid,
) -> Result<ShopVerification, VerificationError> {
    // Every shop gets cycle 1 at creation
    ShopVerification::latest(conn, shop_id)
        .await?
        .ok_or(VerificationError::ShopNotFound)
}

fn lost_race(from: VerificationStatus, to: VerificationStatus) -> VerificationError {
    VerificationError::InvalidTransition {
        from: from.as_str(),
        to: to.as_str(),
    }
}

/// Creates a seller's shop and opens verification cycle 1
pub async fn create_shop(
    pool: &PgPool,
    owner_id: Uuid,
    data: CreateShop,
) -> Result<(Shop, ShopVerification), VerificationError> {
    if data.name.trim().is_empty() {
        return Err(VerificationError::Validation("Shop name is required".to_string()));
    }

    let mut tx = pool.begin().await?;

    let shop = Shop::create(&mut tx, owner_id, data).await.map_err(|e| {
        if is_unique_violation(&e) {
            VerificationError::ShopAlreadyExists
        } else {
            VerificationError::Database(e)
        }
    })?;
    let cycle = ShopVerification::open(&mut tx, shop.id, owner_id).await?;

    tx.commit().await?;

    tracing::info!(shop_id = %shop.id, owner_id = %owner_id, "Shop created and submitted for verification");

    Ok((shop, cycle))
}

/// Opens a new cycle after a rejection
pub async fn resubmit(
    pool: &PgPool,
    shop_id: Uuid,
    seller_id: Uuid,
) -> Result<(Shop, ShopVerification), VerificationError> {
    let mut tx = pool.begin().await?;
    let shop = lock_shop(&mut tx, shop_id).await?;

    if !shop.verification_status.can_resubmit() {
        return Err(lost_race(shop.verification_status, VerificationStatus::Pending));
    }

    let cycle = ShopVerification::open(&mut tx, shop.id, seller_id)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                lost_race(shop.verification_status, VerificationStatus::Pending)
            } else {
                VerificationError::Database(e)
            }
        })?;
    let shop = Shop::set_verification_status(&mut tx, shop.id, VerificationStatus::Pending).await?;

    tx.commit().await?;

    tracing::info!(shop_id = %shop.id, cycle = cycle.cycle, "Shop resubmitted for verification");

    Ok((shop, cycle))
}

/// Issues a verification code to the shop's contact
///
/// Allowed from `pending`, and from `otp_sent` to re-send (the old code is
/// superseded). The transaction commits only after delivery succeeds.
pub async fn send_otp(
    pool: &PgPool,
    issuer: &OtpIssuer,
    delivery: &dyn OtpDelivery,
    shop_id: Uuid,
    admin_id: Uuid,
) -> Result<CodeSent, VerificationError> {
    let mut tx = pool.begin().await?;
    let shop = lock_shop(&mut tx, shop_id).await?;
    check_transition(shop.verification_status, VerificationStatus::OtpSent)?;

    let destination = shop
        .otp_destination()
        .map(str::to_string)
        .ok_or(VerificationError::NoDestination)?;

    let cycle = current_cycle(&mut tx, shop.id).await?;
    let issued = issuer
        .issue(&mut tx, shop.id, OtpPurpose::ShopVerification, Some(&destination))
        .await?;
    let cycle = ShopVerification::mark_otp_sent(&mut tx, cycle.id, admin_id)
        .await?
        .ok_or_else(|| lost_race(cycle.status, VerificationStatus::OtpSent))?;
    let shop = Shop::set_verification_status(&mut tx, shop.id, VerificationStatus::OtpSent).await?;

    delivery
        .deliver(&OtpMessage {
            subject_id: shop.id,
            purpose: OtpPurpose::ShopVerification,
            destination,
            code: issued.code().to_string(),
            expires_in_minutes: issuer.ttl_minutes(),
        })
        .await?;

    tx.commit().await?;

    tracing::info!(
        shop_id = %shop.id,
        admin_id = %admin_id,
        cycle = cycle.cycle,
        channel = delivery.name(),
        "Verification code sent"
    );

    Ok(CodeSent {
        shop,
        cycle,
        otp: issued.otp,
    })
}

/// Confirms the seller's code and marks the shop verified
///
/// A wrong, expired or reused code leaves the shop in `otp_sent`; the attempt
/// bookkeeping is committed before the error is returned.
pub async fn confirm(
    pool: &PgPool,
    issuer: &OtpIssuer,
    shop_id: Uuid,
    seller_id: Uuid,
    code: &str,
) -> Result<(Shop, ShopVerification), VerificationError> {
    let mut tx = pool.begin().await?;
    let shop = lock_shop(&mut tx, shop_id).await?;

    // A replayed code on a verified shop reports the code's own standing
    if shop.verification_status == VerificationStatus::Verified {
        return match issuer
            .validate(&mut tx, shop.id, OtpPurpose::ShopVerification, code)
            .await
        {
            Err(e) => Err(e.into()),
            Ok(_) => Err(lost_race(shop.verification_status, VerificationStatus::Verified)),
        };
    }
    check_transition(shop.verification_status, VerificationStatus::Verified)?;

    match issuer
        .validate(&mut tx, shop.id, OtpPurpose::ShopVerification, code)
        .await
    {
        Ok(_) => {}
        Err(OtpError::Database(e)) => return Err(VerificationError::Database(e)),
        Err(e) => {
            tx.commit().await?;
            tracing::info!(shop_id = %shop.id, error = %e, "Verification code rejected");
            return Err(e.into());
        }
    }

    let cycle = current_cycle(&mut tx, shop.id).await?;
    let cycle = ShopVerification::mark_verified(&mut tx, cycle.id, seller_id)
        .await?
        .ok_or_else(|| lost_race(cycle.status, VerificationStatus::Verified))?;
    let shop = Shop::set_verification_status(&mut tx, shop.id, VerificationStatus::Verified).await?;

    tx.commit().await?;

    tracing::info!(shop_id = %shop.id, cycle = cycle.cycle, "Shop verified");

    Ok((shop, cycle))
}

/// Rejects the open cycle with a reason
pub async fn reject(
    pool: &PgPool,
    issuer: &OtpIssuer,
    shop_id: Uuid,
    admin_id: Uuid,
    reason: &str,
) -> Result<(Shop, ShopVerification), VerificationError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(VerificationError::Validation(
            "A rejection reason is required".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let shop = lock_shop(&mut tx, shop_id).await?;
    check_transition(shop.verification_status, VerificationStatus::Rejected)?;

    let cycle = current_cycle(&mut tx, shop.id).await?;
    let cycle = ShopVerification::mark_rejected(&mut tx, cycle.id, admin_id, reason)
        .await?
        .ok_or_else(|| lost_race(cycle.status, VerificationStatus::Rejected))?;
    issuer
        .invalidate_active(&mut tx, shop.id, OtpPurpose::ShopVerification)
        .await?;
    let shop = Shop::set_verification_status(&mut tx, shop.id, VerificationStatus::Rejected).await?;

    tx.commit().await?;

    tracing::info!(shop_id = %shop.id, admin_id = %admin_id, cycle = cycle.cycle, "Shop verification rejected");

    Ok((shop, cycle))
}

/// Replaces the admin notes on the current cycle
pub async fn annotate(
    pool: &PgPool,
    shop_id: Uuid,
    notes: Option<&str>,
) -> Result<ShopVerification, VerificationError> {
    let notes = notes.map(str::trim).filter(|n| !n.is_empty());

    let mut tx = pool.begin().await?;
    lock_shop(&mut tx, shop_id).await?;
    let cycle = current_cycle(&mut tx, shop_id).await?;
    let cycle = ShopVerification::set_notes(&mut tx, cycle.id, notes)
        .await?
        .ok_or(VerificationError::ShopNotFound)?;
    tx.commit().await?;

    Ok(cycle)
}

/// All cycles of a shop, newest first
pub async fn history(pool: &PgPool, shop_id: Uuid) -> Result<Vec<ShopVerification>, VerificationError> {
    Ok(ShopVerification::history(pool, shop_id).await?)
}

/// Current verification state of a seller's shop
pub async fn overview(
    pool: &PgPool,
    issuer: &OtpIssuer,
    shop: Shop,
) -> Result<VerificationOverview, VerificationError> {
    let mut conn = pool.acquire().await?;
    let current_cycle = ShopVerification::latest(&mut conn, shop.id).await?;
    let active_code = issuer
        .active(&mut conn, shop.id, OtpPurpose::ShopVerification)
        .await?;

    Ok(VerificationOverview {
        shop,
        current_cycle,
        active_code,
    })
}
