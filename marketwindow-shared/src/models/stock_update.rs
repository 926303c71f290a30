/// Stock ledger entries
///
/// Rows are only ever inserted; a database trigger rejects `UPDATE` and
/// `DELETE`. Corrections are new rows whose `reverses_id` points at the entry
/// they compensate. See [`crate::ledger`] for the rules that govern writes.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE stock_updates (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     product_id UUID NOT NULL REFERENCES products(id),
///     shop_id UUID NOT NULL REFERENCES shops(id),
///     delta BIGINT NOT NULL CHECK (delta <> 0),
///     resulting_quantity BIGINT NOT NULL CHECK (resulting_quantity >= 0),
///     actor_id UUID NOT NULL REFERENCES users(id),
///     reason VARCHAR(255) NOT NULL,
///     reverses_id UUID REFERENCES stock_updates(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
/// );
///
/// CREATE UNIQUE INDEX stock_updates_reverses_once
///     ON stock_updates (reverses_id) WHERE reverses_id IS NOT NULL;
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// One ledger entry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StockUpdate {
    pub id: Uuid,
    pub product_id: Uuid,
    pub shop_id: Uuid,

    /// Signed change actually applied (never zero)
    pub delta: i64,

    /// Product quantity right after this entry
    pub resulting_quantity: i64,

    pub actor_id: Uuid,
    pub reason: String,

    /// Entry this one compensates, if it is an undo
    pub reverses_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl StockUpdate {
    pub fn is_reversal(&self) -> bool {
        self.reverses_id.is_some()
    }
}

/// Values for a new ledger entry
#[derive(Debug, Clone)]
pub struct NewStockUpdate<'a> {
    pub product_id: Uuid,
    pub shop_id: Uuid,
    pub delta: i64,
    pub resulting_quantity: i64,
    pub actor_id: Uuid,
    pub reason: &'a str,
    pub reverses_id: Option<Uuid>,
}

const STOCK_UPDATE_COLUMNS: &str = "id, product_id, shop_id, delta, resulting_quantity, actor_id, \
                                    reason, reverses_id, created_at";

impl StockUpdate {
    /// Appends an entry on the caller's transaction
    ///
    /// # Errors
    ///
    /// A unique violation on `stock_updates_reverses_once` means the target
    /// entry was already reversed.
    pub async fn insert(
        conn: &mut PgConnection,
        entry: NewStockUpdate<'_>,
    ) -> Result<Self, sqlx::Error> {
        let update = sqlx::query_as::<_, StockUpdate>(&format!(
            r#"
            INSERT INTO stock_updates
                (product_id, shop_id, delta, resulting_quantity, actor_id, reason, reverses_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {STOCK_UPDATE_COLUMNS}
            "#
        ))
        .bind(entry.product_id)
        .bind(entry.shop_id)
        .bind(entry.delta)
        .bind(entry.resulting_quantity)
        .bind(entry.actor_id)
        .bind(entry.reason)
        .bind(entry.reverses_id)
        .fetch_one(conn)
        .await?;

        Ok(update)
    }

    pub async fn find(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let update = sqlx::query_as::<_, StockUpdate>(&format!(
            "SELECT {STOCK_UPDATE_COLUMNS} FROM stock_updates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(update)
    }

    /// The entry that reversed `id`, if any
    pub async fn find_reversal(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let update = sqlx::query_as::<_, StockUpdate>(&format!(
            "SELECT {STOCK_UPDATE_COLUMNS} FROM stock_updates WHERE reverses_id = $1"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(update)
    }

    /// Entries for a product, newest first
    pub async fn history(
        pool: &PgPool,
        product_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let updates = sqlx::query_as::<_, StockUpdate>(&format!(
            r#"
            SELECT {STOCK_UPDATE_COLUMNS} FROM stock_updates
            WHERE product_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(product_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(updates)
    }

    /// Recent entries across a shop, newest first
    pub async fn recent_for_shop(
        pool: &PgPool,
        shop_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let updates = sqlx::query_as::<_, StockUpdate>(&format!(
            r#"
            SELECT {STOCK_UPDATE_COLUMNS} FROM stock_updates
            WHERE shop_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#
        ))
        .bind(shop_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        Ok(updates)
    }

    /// Sum of all deltas for a product
    pub async fn ledger_sum(pool: &PgPool, product_id: Uuid) -> Result<i64, sqlx::Error> {
        let sum: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0)::BIGINT FROM stock_updates WHERE product_id = $1",
        )
        .bind(product_id)
        .fetch_one(pool)
        .await?;

        Ok(sum)
    }
}
