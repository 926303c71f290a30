/// Append-only stock ledger
///
/// Every change to a product's stock is a [`StockUpdate`] row. The
/// `products.quantity` column is a projection of those rows and is written in
/// the same transaction as the entry that explains it, under a `FOR UPDATE`
/// lock on the product. Concurrent writers to one product therefore serialize
/// and their deltas compose.
///
/// # Rules
///
/// - Entries are never updated or deleted (a trigger enforces it).
/// - `quantity == SUM(delta)` for every product at every commit.
/// - A negative change larger than the stock on hand is clamped to zero; the
///   entry records the delta actually applied.
/// - A change that nets to zero is rejected.
/// - Undo appends the inverse delta with `reverses_id` set. An entry can be
///   undone once; an undo entry cannot itself be undone; an undo that would
///   drive stock negative is rejected.
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::ledger::{self, StockChange};
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, product_id: Uuid, seller_id: Uuid) -> Result<(), ledger::LedgerError> {
/// let sold = ledger::apply(&pool, product_id, StockChange::Delta(-5), seller_id, None, None).await?;
/// assert_eq!(sold.update.delta, -5);
///
/// // Compensate the sale; both entries stay in the history
/// let undo = ledger::undo(&pool, sold.update.id, seller_id, None, None).await?;
/// assert_eq!(undo.update.reverses_id, Some(sold.update.id));
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;
use uuid::Uuid;

use crate::is_unique_violation;
use crate::models::product::{CreateProduct, Product};
use crate::models::stock_update::{NewStockUpdate, StockUpdate};

/// Default page size for ledger history
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Longest reason stored on an entry
pub const MAX_REASON_LENGTH: usize = 255;

/// Reason recorded on the opening entry of a new product
pub const INITIAL_STOCK_REASON: &str = "initial stock";

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Product not found")]
    ProductNotFound,

    #[error("Stock entry not found")]
    EntryNotFound,

    #[error("Stock change has no effect")]
    NoChange,

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Stock entry has already been undone")]
    AlreadyReversed,

    #[error("An undo entry cannot itself be undone")]
    CannotUndoReversal,

    #[error("Insufficient stock: {available} available, {required} required")]
    InsufficientStock { available: i64, required: i64 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Requested change to a product's stock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum StockChange {
    /// Add (positive) or remove (negative) units
    Delta(i64),

    /// Set stock to an absolute quantity
    SetTo(i64),
}

impl StockChange {
    /// Resolves the change against the stock on hand into the delta to record
    ///
    /// ```
    /// use marketwindow_shared::ledger::StockChange;
    ///
    /// assert_eq!(StockChange::Delta(-8).resolve(5).unwrap(), -5);
    /// assert_eq!(StockChange::SetTo(12).resolve(5).unwrap(), 7);
    /// assert!(StockChange::SetTo(5).resolve(5).is_err());
    /// ```
    pub fn resolve(&self, on_hand: i64) -> Result<i64, LedgerError> {
        let delta = match *self {
            StockChange::Delta(delta) if delta < 0 => delta.max(-on_hand),
            StockChange::Delta(delta) => {
                on_hand
                    .checked_add(delta)
                    .ok_or_else(|| LedgerError::InvalidQuantity("quantity overflow".to_string()))?;
                delta
            }
            StockChange::SetTo(target) if target < 0 => {
                return Err(LedgerError::InvalidQuantity(
                    "quantity cannot be negative".to_string(),
                ))
            }
            StockChange::SetTo(target) => target - on_hand,
        };

        if delta == 0 {
            return Err(LedgerError::NoChange);
        }

        Ok(delta)
    }
}

/// Reason used when the caller gives none
pub fn default_reason(change: StockChange, delta: i64) -> &'static str {
    match change {
        StockChange::SetTo(_) => "stock adjusted",
        StockChange::Delta(_) if delta > 0 => "restocked",
        StockChange::Delta(_) => "goods sold",
    }
}

fn normalize_reason(reason: Option<&str>) -> Option<String> {
    reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| r.chars().take(MAX_REASON_LENGTH).collect())
}

/// A committed ledger entry with the product it moved
#[derive(Debug, Clone, Serialize)]
pub struct AppliedChange {
    pub update: StockUpdate,
    pub product: Product,
}

/// Projection check for one product
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub product_id: Uuid,
    pub quantity: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

/// One item of a bulk stock request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItem {
    pub product_id: Uuid,
    pub change: StockChange,
    pub reason: Option<String>,
}

async fn lock_product(
    conn: &mut PgConnection,
    product_id: Uuid,
    within_shop: Option<Uuid>,
) -> Result<Product, LedgerError> {
    let product = Product::lock(conn, product_id)
        .await?
        .ok_or(LedgerError::ProductNotFound)?;

    // Another shop's product looks exactly like a missing one
    match within_shop {
        Some(shop_id) if shop_id != product.shop_id => Err(LedgerError::ProductNotFound),
        _ => Ok(product),
    }
}

/// Applies a change on the caller's transaction
///
/// `within_shop` restricts the write to products of that shop.
pub async fn apply_in(
    conn: &mut PgConnection,
    product_id: Uuid,
    change: StockChange,
    actor_id: Uuid,
    reason: Option<&str>,
    within_shop: Option<Uuid>,
) -> Result<AppliedChange, LedgerError> {
    let product = lock_product(&mut *conn, product_id, within_shop).await?;
    let delta = change.resolve(product.quantity)?;
    let resulting_quantity = product.quantity + delta;
    let reason = normalize_reason(reason)
        .unwrap_or_else(|| default_reason(change, delta).to_string());

    let update = StockUpdate::insert(
        &mut *conn,
        NewStockUpdate {
            product_id,
            shop_id: product.shop_id,
            delta,
            resulting_quantity,
            actor_id,
            reason: &reason,
            reverses_id: None,
        },
    )
    .await?;

    let product = Product::set_quantity(&mut *conn, product_id, resulting_quantity).await?;

    tracing::debug!(
        product_id = %product_id,
        entry_id = %update.id,
        delta,
        resulting_quantity,
        "Stock entry appended"
    );

    Ok(AppliedChange { update, product })
}

/// Applies a change in its own transaction
pub async fn apply(
    pool: &PgPool,
    product_id: Uuid,
    change: StockChange,
    actor_id: Uuid,
    reason: Option<&str>,
    within_shop: Option<Uuid>,
) -> Result<AppliedChange, LedgerError> {
    let mut tx = pool.begin().await?;
    let applied = apply_in(&mut tx, product_id, change, actor_id, reason, within_shop).await?;
    tx.commit().await?;

    tracing::info!(
        product_id = %product_id,
        delta = applied.update.delta,
        quantity = applied.product.quantity,
        "Stock updated"
    );

    Ok(applied)
}

/// Applies several changes, each in its own transaction
///
/// Results line up with `items`; one failure does not roll back the others.
pub async fn apply_bulk(
    pool: &PgPool,
    items: &[BulkItem],
    actor_id: Uuid,
    within_shop: Option<Uuid>,
) -> Vec<Result<AppliedChange, LedgerError>> {
    let mut results = Vec::with_capacity(items.len());

    for item in items {
        let result = apply(
            pool,
            item.product_id,
            item.change,
            actor_id,
            item.reason.as_deref(),
            within_shop,
        )
        .await;

        if let Err(e) = &result {
            tracing::debug!(product_id = %item.product_id, error = %e, "Bulk stock item failed");
        }
        results.push(result);
    }

    results
}

/// Appends the inverse of an entry
///
/// The original entry is left untouched.
pub async fn undo(
    pool: &PgPool,
    entry_id: Uuid,
    actor_id: Uuid,
    reason: Option<&str>,
    within_shop: Option<Uuid>,
) -> Result<AppliedChange, LedgerError> {
    let mut tx = pool.begin().await?;

    let entry = StockUpdate::find(&mut tx, entry_id)
        .await?
        .filter(|e| within_shop.map_or(true, |shop_id| e.shop_id == shop_id))
        .ok_or(LedgerError::EntryNotFound)?;

    if entry.is_reversal() {
        return Err(LedgerError::CannotUndoReversal);
    }

    let product = lock_product(&mut tx, entry.product_id, None).await?;

    if StockUpdate::find_reversal(&mut tx, entry.id).await?.is_some() {
        return Err(LedgerError::AlreadyReversed);
    }

    let delta = -entry.delta;
    let resulting_quantity = product.quantity + delta;
    if resulting_quantity < 0 {
        return Err(LedgerError::InsufficientStock {
            available: product.quantity,
            required: entry.delta,
        });
    }

    let reason = normalize_reason(reason).unwrap_or_else(|| {
        format!("undo: {}", entry.reason)
            .chars()
            .take(MAX_REASON_LENGTH)
            .collect()
    });

    let update = StockUpdate::insert(
        &mut tx,
        NewStockUpdate {
            product_id: entry.product_id,
            shop_id: entry.shop_id,
            delta,
            resulting_quantity,
            actor_id,
            reason: &reason,
            reverses_id: Some(entry.id),
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::AlreadyReversed
        } else {
            LedgerError::Database(e)
        }
    })?;

    let product = Product::set_quantity(&mut tx, entry.product_id, resulting_quantity).await?;
    tx.commit().await?;

    tracing::info!(
        product_id = %entry.product_id,
        entry_id = %entry.id,
        undo_id = %update.id,
        delta,
        quantity = resulting_quantity,
        "Stock entry undone"
    );

    Ok(AppliedChange { update, product })
}

/// Creates a product and writes its opening stock in one transaction
pub async fn create_product(
    pool: &PgPool,
    shop_id: Uuid,
    data: CreateProduct,
    initial_quantity: i64,
    actor_id: Uuid,
) -> Result<Product, LedgerError> {
    if initial_quantity < 0 {
        return Err(LedgerError::InvalidQuantity(
            "initial quantity cannot be negative".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let mut product = Product::create(&mut tx, shop_id, data).await?;

    if initial_quantity > 0 {
        product = apply_in(
            &mut tx,
            product.id,
            StockChange::Delta(initial_quantity),
            actor_id,
            Some(INITIAL_STOCK_REASON),
            Some(shop_id),
        )
        .await?
        .product;
    }

    tx.commit().await?;

    tracing::info!(product_id = %product.id, shop_id = %shop_id, initial_quantity, "Product created");

    Ok(product)
}

/// Ledger entries for a product, newest first
pub async fn history(
    pool: &PgPool,
    product_id: Uuid,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<StockUpdate>, LedgerError> {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 500);
    let offset = offset.unwrap_or(0).max(0);

    Ok(StockUpdate::history(pool, product_id, limit, offset).await?)
}

/// Compares a product's quantity with the sum of its ledger
pub async fn reconcile(pool: &PgPool, product_id: Uuid) -> Result<Reconciliation, LedgerError> {
    let product = Product::find_by_id(pool, product_id)
        .await?
        .ok_or(LedgerError::ProductNotFound)?;
    let ledger_sum = StockUpdate::ledger_sum(pool, product_id).await?;
    let consistent = product.quantity == ledger_sum;

    if !consistent {
        tracing::error!(
            product_id = %product_id,
            quantity = product.quantity,
            ledger_sum,
            "Stock projection does not match ledger"
        );
    }

    Ok(Reconciliation {
        product_id,
        quantity: product.quantity,
        ledger_sum,
        consistent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_delta_passes_through() {
        assert_eq!(StockChange::Delta(7).resolve(0).unwrap(), 7);
        assert_eq!(StockChange::Delta(7).resolve(3).unwrap(), 7);
    }

    #[test]
    fn test_negative_delta_clamps_at_zero() {
        assert_eq!(StockChange::Delta(-3).resolve(10).unwrap(), -3);
        assert_eq!(StockChange::Delta(-10).resolve(10).unwrap(), -10);
        assert_eq!(StockChange::Delta(-25).resolve(10).unwrap(), -10);
    }

    #[test]
    fn test_no_change_is_rejected() {
        assert!(matches!(StockChange::Delta(0).resolve(4), Err(LedgerError::NoChange)));
        assert!(matches!(StockChange::Delta(-1).resolve(0), Err(LedgerError::NoChange)));
        assert!(matches!(StockChange::SetTo(4).resolve(4), Err(LedgerError::NoChange)));
    }

    #[test]
    fn test_set_to() {
        assert_eq!(StockChange::SetTo(0).resolve(9).unwrap(), -9);
        assert_eq!(StockChange::SetTo(20).resolve(9).unwrap(), 11);
        assert!(matches!(
            StockChange::SetTo(-1).resolve(9),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_overflow_is_rejected() {
        assert!(matches!(
            StockChange::Delta(i64::MAX).resolve(1),
            Err(LedgerError::InvalidQuantity(_))
        ));
    }

    #[test]
    fn test_default_reasons() {
        assert_eq!(default_reason(StockChange::Delta(5), 5), "restocked");
        assert_eq!(default_reason(StockChange::Delta(-5), -5), "goods sold");
        assert_eq!(default_reason(StockChange::SetTo(3), 3), "stock adjusted");
        assert_eq!(default_reason(StockChange::SetTo(0), -3), "stock adjusted");
    }

    #[test]
    fn test_reason_is_trimmed_and_truncated() {
        assert_eq!(normalize_reason(Some("  weekly delivery ")), Some("weekly delivery".to_string()));
        assert_eq!(normalize_reason(Some("   ")), None);
        assert_eq!(normalize_reason(None), None);

        let long = "x".repeat(400);
        assert_eq!(normalize_reason(Some(&long)).unwrap().len(), MAX_REASON_LENGTH);
    }

    #[test]
    fn test_stock_change_json_shape() {
        let change: StockChange = serde_json::from_str(r#"{"mode":"delta","value":-5}"#).unwrap();
        assert_eq!(change, StockChange::Delta(-5));

        let change: StockChange = serde_json::from_str(r#"{"mode":"set_to","value":12}"#).unwrap();
        assert_eq!(change, StockChange::SetTo(12));
    }
}
