/// Buyer follows of shops
///
/// # Schema
///
/// ```sql
/// CREATE TABLE shop_follows (
///     user_id UUID NOT NULL REFERENCES users(id),
///     shop_id UUID NOT NULL REFERENCES shops(id),
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (user_id, shop_id)
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::shop::ShopListing;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ShopFollow {
    pub user_id: Uuid,
    pub shop_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A buyer following a shop, as the shop owner sees it
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShopFollower {
    pub user_id: Uuid,
    pub username: String,
    pub followed_at: DateTime<Utc>,
}

impl ShopFollow {
    /// Follows a shop; returns `None` if already following
    pub async fn follow(pool: &PgPool, user_id: Uuid, shop_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let follow = sqlx::query_as::<_, ShopFollow>(
            r#"
            INSERT INTO shop_follows (user_id, shop_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, shop_id) DO NOTHING
            RETURNING user_id, shop_id, created_at
            "#,
        )
        .bind(user_id)
        .bind(shop_id)
        .fetch_optional(pool)
        .await?;

        Ok(follow)
    }

    pub async fn unfollow(pool: &PgPool, user_id: Uuid, shop_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM shop_follows WHERE user_id = $1 AND shop_id = $2")
            .bind(user_id)
            .bind(shop_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn is_following(pool: &PgPool, user_id: Uuid, shop_id: Uuid) -> Result<bool, sqlx::Error> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM shop_follows WHERE user_id = $1 AND shop_id = $2)",
        )
        .bind(user_id)
        .bind(shop_id)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Visible shops a buyer follows, most recently followed first
    pub async fn list_following(
        pool: &PgPool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShopListing>, sqlx::Error> {
        let shops = sqlx::query_as::<_, ShopListing>(
            r#"
            SELECT s.id, s.name, s.description, s.region, s.district, s.town, s.promoted,
                   s.verified_at, s.updated_at,
                   (SELECT COUNT(*) FROM products p WHERE p.shop_id = s.id AND p.is_active) AS product_count,
                   (SELECT COUNT(*) FROM shop_follows f2 WHERE f2.shop_id = s.id) AS follower_count
            FROM shop_follows f
            JOIN shops s ON s.id = f.shop_id
            WHERE f.user_id = $1 AND s.is_active AND s.verification_status = 'verified'
            ORDER BY f.created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(shops)
    }

    /// Active accounts following a shop, newest follower first
    pub async fn list_followers(
        pool: &PgPool,
        shop_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShopFollower>, sqlx::Error> {
        let followers = sqlx::query_as::<_, ShopFollower>(
            r#"
            SELECT u.id AS user_id, u.username, f.created_at AS followed_at
            FROM shop_follows f
            JOIN users u ON u.id = f.user_id
            WHERE f.shop_id = $1 AND u.is_active
            ORDER BY f.created_at DESC, u.id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(shop_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        Ok(followers)
    }

    pub async fn count_followers(pool: &PgPool, shop_id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM shop_follows f
            JOIN users u ON u.id = f.user_id
            WHERE f.shop_id = $1 AND u.is_active
            "#,
        )
        .bind(shop_id)
        .fetch_one(pool)
        .await
    }
}
