/// Public catalogue
///
/// Browsing needs no account. Only active shops in `verified` status, and
/// only active products of those shops, are ever returned; anything else
/// answers `404` as if it did not exist.
///
/// # Endpoints
///
/// - `GET /v1/shops?search=&region=&sort=name|last_updated|promoted&limit=&offset=`
/// - `GET /v1/shops/:shop_id`
/// - `GET /v1/shops/:shop_id/products?search=&category_id=&in_stock=`
/// - `GET /v1/products?search=&category_id=&shop_id=&in_stock=`
/// - `GET /v1/products/:product_id`
/// - `GET /v1/categories`

use crate::{
    app::AppState,
    error::ApiResult,
    routes::{not_found, Page, Pagination},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use marketwindow_shared::models::{
    category::Category,
    product::{CatalogueFilter, Product, StockLevel},
    shop::{Shop, ShopListing, VisibleShopFilter},
};
use serde::Serialize;
use uuid::Uuid;

/// Buyer-facing shop detail
#[derive(Debug, Serialize)]
pub struct PublicShop {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub address: Option<String>,
    pub region: Option<String>,
    pub district: Option<String>,
    pub town: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub promoted: bool,
    pub verified_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<Shop> for PublicShop {
    fn from(shop: Shop) -> Self {
        Self {
            id: shop.id,
            name: shop.name,
            description: shop.description,
            address: shop.address,
            region: shop.region,
            district: shop.district,
            town: shop.town,
            phone: shop.phone,
            email: shop.email,
            promoted: shop.promoted,
            verified_at: shop.verified_at,
        }
    }
}

/// Buyer-facing product; exact stock counts stay with the seller
#[derive(Debug, Serialize)]
pub struct PublicProduct {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub category_id: Option<Uuid>,
    pub name: String,
    pub product_type: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub price_cents: i64,
    pub availability: StockLevel,
}

impl PublicProduct {
    fn new(product: Product, threshold: i64) -> Self {
        let availability = product.stock_level(threshold);
        Self {
            id: product.id,
            shop_id: product.shop_id,
            category_id: product.category_id,
            name: product.name,
            product_type: product.product_type,
            description: product.description,
            tags: product.tags,
            price_cents: product.price_cents,
            availability,
        }
    }
}

/// Lists verified, active shops
pub async fn list_shops(
    State(state): State<AppState>,
    Query(filter): Query<VisibleShopFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<ShopListing>>> {
    let shops =
        Shop::list_visible(&state.db, &filter, pagination.limit(), pagination.offset()).await?;
    let total = Shop::count_visible(&state.db, &filter).await?;

    Ok(Json(Page::new(shops, &pagination).with_total(total)))
}

pub async fn get_shop(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<Json<PublicShop>> {
    let shop = Shop::find_visible(&state.db, shop_id)
        .await?
        .ok_or_else(|| not_found("Shop"))?;

    Ok(Json(shop.into()))
}

/// Products of one visible shop
pub async fn list_shop_products(
    State(state): State<AppState>,
    Path(shop_id): Path<Uuid>,
    Query(filter): Query<CatalogueFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<PublicProduct>>> {
    Shop::find_visible(&state.db, shop_id)
        .await?
        .ok_or_else(|| not_found("Shop"))?;

    let filter = CatalogueFilter {
        shop_id: Some(shop_id),
        ..filter
    };

    search(&state, &filter, &pagination).await
}

/// Searches products across visible shops
pub async fn search_products(
    State(state): State<AppState>,
    Query(filter): Query<CatalogueFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<PublicProduct>>> {
    search(&state, &filter, &pagination).await
}

async fn search(
    state: &AppState,
    filter: &CatalogueFilter,
    pagination: &Pagination,
) -> ApiResult<Json<Page<PublicProduct>>> {
    let threshold = state.low_stock_threshold();
    let products =
        Product::list_visible(&state.db, filter, pagination.limit(), pagination.offset()).await?;
    let products = products
        .into_iter()
        .map(|p| PublicProduct::new(p, threshold))
        .collect();

    Ok(Json(Page::new(products, pagination)))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<PublicProduct>> {
    let product = Product::find_visible(&state.db, product_id)
        .await?
        .ok_or_else(|| not_found("Product"))?;

    Ok(Json(PublicProduct::new(product, state.low_stock_threshold())))
}

/// Active categories
pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(Category::list(&state.db, true).await?))
}
