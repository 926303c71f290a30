/// Product model and database operations
///
/// `quantity` is a projection of the stock ledger. Nothing in this module
/// writes it except [`Product::set_quantity`], which the
/// [`ledger`](crate::ledger) calls inside the transaction that appends the
/// matching [`StockUpdate`](super::stock_update::StockUpdate). Product details
/// (name, price, category...) are edited freely; stock never is.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE products (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     shop_id UUID NOT NULL REFERENCES shops(id),
///     category_id UUID REFERENCES categories(id),
///     name VARCHAR(120) NOT NULL,
///     product_type VARCHAR(80),
///     description TEXT,
///     tags TEXT[] NOT NULL DEFAULT '{}',
///     price_cents BIGINT NOT NULL CHECK (price_cents >= 0),
///     quantity BIGINT NOT NULL DEFAULT 0 CHECK (quantity >= 0),
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::models::product::{Product, SellerProductFilter};
/// use sqlx::PgPool;
/// use uuid::Uuid;

use super::like_pattern;
///
/// # async fn example(pool: PgPool, shop_id: Uuid) -> Result<(), sqlx::Error> {
/// let filter = SellerProductFilter { low_stock: Some(true), ..Default::default() };
/// for product in Product::list_for_shop(&pool, shop_id, &filter, 10, 50, 0).await? {
///     println!("{} has {} left", product.name, product.quantity);
/// }
/// # Ok(())
/// # }
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Default threshold at or below which stock counts as low
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

/// Derived stock level of a product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StockLevel {
    OutOfStock,
    Low,
    InStock,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub product_type: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,

    /// Price in minor currency units
    pub price_cents: i64,

    /// Current stock; always equals the sum of this product's ledger deltas
    pub quantity: i64,

    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn is_out_of_stock(&self) -> bool {
        self.quantity <= 0
    }

    pub fn is_low_stock(&self, threshold: i64) -> bool {
        self.quantity <= threshold
    }

    pub fn stock_level(&self, threshold: i64) -> StockLevel {
        if self.is_out_of_stock() {
            StockLevel::OutOfStock
        } else if self.is_low_stock(threshold) {
            StockLevel::Low
        } else {
            StockLevel::InStock
        }
    }
}

/// Input for creating a product
///
/// Opening stock is not part of the row; it is written to the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    pub product_type: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub price_cents: i64,
    pub category_id: Option<Uuid>,
}

/// Editable product details (`None` leaves a field unchanged)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub product_type: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub price_cents: Option<i64>,
    pub category_id: Option<Uuid>,
}

/// Seller inventory filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SellerProductFilter {
    pub search: Option<String>,
    pub in_stock: Option<bool>,
    pub low_stock: Option<bool>,
    pub out_of_stock: Option<bool>,
    #[serde(default)]
    pub include_inactive: bool,
}

/// Buyer catalogue filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogueFilter {
    pub search: Option<String>,
    pub category_id: Option<Uuid>,
    pub shop_id: Option<Uuid>,
    pub in_stock: Option<bool>,
}

/// Seller inventory totals
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct InventorySummary {
    pub product_count: i64,
    pub active_count: i64,
    pub low_stock_count: i64,
    pub out_of_stock_count: i64,
    pub total_units: i64,
}

const PRODUCT_COLUMNS: &str = "id, shop_id, category_id, name, product_type, description, tags, \
                               price_cents, quantity, is_active, created_at, updated_at";

impl Product {
    /// Inserts a product with zero stock on the caller's transaction
    pub async fn create(
        conn: &mut PgConnection,
        shop_id: Uuid,
        data: CreateProduct,
    ) -> Result<Self, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            INSERT INTO products (shop_id, category_id, name, product_type, description, tags, price_cents)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(shop_id)
        .bind(data.category_id)
        .bind(data.name)
        .bind(data.product_type)
        .bind(data.description)
        .bind(data.tags)
        .bind(data.price_cents)
        .fetch_one(conn)
        .await?;

        Ok(product)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(product)
    }

    /// Finds a product only if it belongs to a shop owned by `owner_id`
    ///
    /// Returns `None` both for missing products and for other sellers'
    /// products, so callers cannot test for existence.
    pub async fn find_for_owner(
        pool: &PgPool,
        id: Uuid,
        owner_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT p.id, p.shop_id, p.category_id, p.name, p.product_type, p.description, p.tags,
                   p.price_cents, p.quantity, p.is_active, p.created_at, p.updated_at
            FROM products p
            JOIN shops s ON s.id = p.shop_id
            WHERE p.id = $1 AND s.owner_id = $2
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;

        Ok(product)
    }

    /// Finds an active product of a buyer-visible shop
    pub async fn find_visible(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(
            r#"
            SELECT p.id, p.shop_id, p.category_id, p.name, p.product_type, p.description, p.tags,
                   p.price_cents, p.quantity, p.is_active, p.created_at, p.updated_at
            FROM products p
            JOIN shops s ON s.id = p.shop_id
            WHERE p.id = $1 AND p.is_active
              AND s.is_active AND s.verification_status = 'verified'
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(product)
    }

    /// Locks the product row for the rest of the transaction
    ///
    /// Every ledger write goes through this lock, which is what makes
    /// concurrent deltas on the same product compose instead of overwrite.
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await?;

        Ok(product)
    }

    /// Writes the quantity projection (ledger only)
    pub(crate) async fn set_quantity(
        conn: &mut PgConnection,
        id: Uuid,
        quantity: i64,
    ) -> Result<Self, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products SET quantity = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(quantity)
        .fetch_one(conn)
        .await?;

        Ok(product)
    }

    pub async fn update_details(
        pool: &PgPool,
        id: Uuid,
        data: UpdateProduct,
    ) -> Result<Option<Self>, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products SET
                name = COALESCE($2, name),
                product_type = COALESCE($3, product_type),
                description = COALESCE($4, description),
                tags = COALESCE($5, tags),
                price_cents = COALESCE($6, price_cents),
                category_id = COALESCE($7, category_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(data.name)
        .bind(data.product_type)
        .bind(data.description)
        .bind(data.tags)
        .bind(data.price_cents)
        .bind(data.category_id)
        .fetch_optional(pool)
        .await?;

        Ok(product)
    }

    /// Soft-activates or deactivates a product
    pub async fn set_active(pool: &PgPool, id: Uuid, is_active: bool) -> Result<Option<Self>, sqlx::Error> {
        let product = sqlx::query_as::<_, Product>(&format!(
            r#"
            UPDATE products SET is_active = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(is_active)
        .fetch_optional(pool)
        .await?;

        Ok(product)
    }

    /// Seller inventory listing
    ///
    /// `low_stock` uses `threshold`; all stock flags combine with AND.
    pub async fn list_for_shop(
        pool: &PgPool,
        shop_id: Uuid,
        filter: &SellerProductFilter,
        threshold: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let products = sqlx::query_as::<_, Product>(&format!(
            r#"
            SELECT {PRODUCT_COLUMNS} FROM products
            WHERE shop_id = $1
              AND ($2 OR is_active)
              AND ($3::text IS NULL OR name ILIKE $3 OR description ILIKE $3 OR product_type ILIKE $3)
              AND ($4::boolean IS NULL OR (quantity > 0) = $4)
              AND ($5::boolean IS NULL OR (quantity <= $6) = $5)
              AND ($7::boolean IS NULL OR (quantity = 0) = $7)
            ORDER BY quantity ASC, name ASC
            LIMIT $8 OFFSET $9
            "#
        ))
        .bind(shop_id)
        .bind(filter.include_inactive)
        .bind(like_pattern(&filter.search))
        .bind(filter.in_stock)
        .bind(filter.low_stock)
        .bind(threshold)
        .bind(filter.out_of_stock)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(products)
    }

    /// Buyer catalogue across visible shops
    pub async fn list_visible(
        pool: &PgPool,
        filter: &CatalogueFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let products = sqlx::query_as::<_, Product>(
            r#"
            SELECT p.id, p.shop_id, p.category_id, p.name, p.product_type, p.description, p.tags,
                   p.price_cents, p.quantity, p.is_active, p.created_at, p.updated_at
            FROM products p
            JOIN shops s ON s.id = p.shop_id
            WHERE p.is_active
              AND s.is_active AND s.verification_status = 'verified'
              AND ($1::text IS NULL OR p.name ILIKE $1 OR p.description ILIKE $1)
              AND ($2::uuid IS NULL OR p.category_id = $2)
              AND ($3::uuid IS NULL OR p.shop_id = $3)
              AND ($4::boolean IS NULL OR (p.quantity > 0) = $4)
            ORDER BY p.name ASC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(like_pattern(&filter.search))
        .bind(filter.category_id)
        .bind(filter.shop_id)
        .bind(filter.in_stock)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(products)
    }

    /// Inventory totals for a shop
    pub async fn inventory_summary(
        pool: &PgPool,
        shop_id: Uuid,
        threshold: i64,
    ) -> Result<InventorySummary, sqlx::Error> {
        let summary = sqlx::query_as::<_, InventorySummary>(
            r#"
            SELECT COUNT(*) AS product_count,
                   COUNT(*) FILTER (WHERE is_active) AS active_count,
                   COUNT(*) FILTER (WHERE is_active AND quantity > 0 AND quantity <= $2) AS low_stock_count,
                   COUNT(*) FILTER (WHERE is_active AND quantity = 0) AS out_of_stock_count,
                   COALESCE(SUM(quantity), 0)::BIGINT AS total_units
            FROM products
            WHERE shop_id = $1
            "#,
        )
        .bind(shop_id)
        .bind(threshold)
        .fetch_one(pool)
        .await?;

        Ok(summary)
    }
}
