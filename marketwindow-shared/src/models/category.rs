/// Product categories
///
/// Flat list managed by admins. Deactivated categories stay attached to their
/// products but disappear from buyer listings.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE categories (
///     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
///     name VARCHAR(100) NOT NULL UNIQUE,
///     description TEXT,
///     is_active BOOLEAN NOT NULL DEFAULT TRUE,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

const CATEGORY_COLUMNS: &str = "id, name, description, is_active, created_at, updated_at";

impl Category {
    pub async fn create(
        pool: &PgPool,
        name: &str,
        description: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        let category = sqlx::query_as::<_, Category>(&format!(
            r#"
            INSERT INTO categories (name, description)
            VALUES ($1, $2)
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(name.trim())
        .bind(description)
        .fetch_one(pool)
        .await?;

        Ok(category)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let category = sqlx::query_as::<_, Category>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(category)
    }

    pub async fn update(
        pool: &PgPool,
        id: Uuid,
        data: UpdateCategory,
    ) -> Result<Option<Self>, sqlx::Error> {
        let category = sqlx::query_as::<_, Category>(&format!(
            r#"
            UPDATE categories SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                is_active = COALESCE($4, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.description)
        .bind(data.is_active)
        .fetch_optional(pool)
        .await?;

        Ok(category)
    }

    /// Lists categories by name; `active_only` for buyer-facing listings
    pub async fn list(pool: &PgPool, active_only: bool) -> Result<Vec<Self>, sqlx::Error> {
        let categories = sqlx::query_as::<_, Category>(&format!(
            r#"
            SELECT {CATEGORY_COLUMNS} FROM categories
            WHERE (NOT $1 OR is_active)
            ORDER BY name ASC
            "#
        ))
        .bind(active_only)
        .fetch_all(pool)
        .await?;

        Ok(categories)
    }
}
