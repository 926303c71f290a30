/// Database models for MarketWindow
///
/// Each model owns its table's queries. Operations that must run inside a
/// caller's transaction take `&mut PgConnection` (pass `&mut *tx`); simple
/// reads take `&PgPool`.
///
/// # Models
///
/// - `user`: Accounts and roles (admin / seller / buyer)
/// - `shop`: Seller shops with the verification status projection
/// - `shop_verification`: One row per verification cycle of a shop
/// - `category`: Product categories
/// - `product`: Shop products with the stock quantity projection
/// - `stock_update`: Append-only stock ledger entries
/// - `otp`: Hashed one-time codes
/// - `shop_follow`: Buyers following shops
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::models::user::{CreateUser, User, UserRole};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> Result<(), sqlx::Error> {
/// let user = User::create(&pool, CreateUser {
///     email: "seller@example.com".to_string(),
///     username: "corner_store".to_string(),
///     password_hash: "$argon2id$...".to_string(),
///     role: UserRole::Seller,
/// }).await?;
/// # Ok(())
/// # }
/// ```

pub mod category;
pub mod otp;
pub mod product;
pub mod shop;
pub mod shop_follow;
pub mod shop_verification;
pub mod stock_update;
pub mod user;

/// Builds an `ILIKE` pattern for a free-text search, escaping wildcards
///
/// Blank input means "no filter".
pub(crate) fn like_pattern(search: &Option<String>) -> Option<String> {
    search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{}%", s.replace('%', "\\%").replace('_', "\\_")))
}
