/// Seller endpoints
///
/// Mounted under `/v1/seller` behind the JWT layer and a seller role gate. A
/// seller owns at most one shop; every handler resolves it from the token and
/// runs the access gate for the operation it performs, so sellers can only
/// ever reach their own shop, products and ledger entries. Another seller's
/// product or entry answers `404`.
///
/// # Endpoints
///
/// - `POST  /shop` - Create the shop (opens verification cycle 1)
/// - `GET   /shop`, `PATCH /shop`
/// - `GET   /shop/verification` - Current cycle and live code metadata
/// - `POST  /shop/verification/confirm` - Submit the code the admin sent
/// - `POST  /shop/verification/resubmit` - Open a new cycle after rejection
/// - `GET   /shop/followers` - Active buyers following the shop
/// - `GET   /products`, `POST /products`
/// - `GET   /products/:id`, `PATCH /products/:id`, `PUT /products/:id/active`
/// - `GET   /products/:id/stock`, `POST /products/:id/stock`
/// - `POST  /stock/bulk` - `207 Multi-Status` when some items fail
/// - `POST  /stock/:entry_id/undo`
/// - `GET   /stock/recent`, `GET /inventory/summary`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{not_found, trimmed, validated, Page, Pagination},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use marketwindow_shared::{
    auth::{
        access::{authorize, Operation},
        middleware::AuthContext,
    },
    ledger::{self, AppliedChange, BulkItem, StockChange, MAX_REASON_LENGTH},
    models::{
        product::{
            CreateProduct, InventorySummary, Product, SellerProductFilter, StockLevel,
            UpdateProduct,
        },
        shop::{CreateShop, Shop, UpdateShop},
        shop_follow::{ShopFollow, ShopFollower},
        shop_verification::ShopVerification,
        stock_update::StockUpdate,
    },
    otp::code,
    verification::{self, VerificationOverview},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Largest bulk stock request
pub const MAX_BULK_ITEMS: usize = 100;

#[derive(Debug, Deserialize, Validate)]
pub struct ShopRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be 1 to 120 characters"))]
    pub name: String,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    #[validate(length(max = 255))]
    pub address: Option<String>,

    #[validate(length(max = 100))]
    pub region: Option<String>,

    #[validate(length(max = 100))]
    pub district: Option<String>,

    #[validate(length(max = 100))]
    pub town: Option<String>,

    #[validate(length(min = 5, max = 30, message = "Phone must be 5 to 30 characters"))]
    pub phone: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ShopUpdateRequest {
    #[validate(length(min = 1, max = 120, message = "Name must be 1 to 120 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    #[validate(length(max = 255))]
    pub address: Option<String>,

    #[validate(length(max = 100))]
    pub region: Option<String>,

    #[validate(length(max = 100))]
    pub district: Option<String>,

    #[validate(length(max = 100))]
    pub town: Option<String>,

    #[validate(length(min = 5, max = 30, message = "Phone must be 5 to 30 characters"))]
    pub phone: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ShopWithCycle {
    pub shop: Shop,
    pub verification: ShopVerification,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1 to 200 characters"))]
    pub name: String,

    #[validate(length(max = 100))]
    pub product_type: Option<String>,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    #[serde(default)]
    #[validate(length(max = 20, message = "At most 20 tags"))]
    pub tags: Vec<String>,

    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price_cents: i64,

    pub category_id: Option<Uuid>,

    /// Opening stock, written to the ledger
    #[serde(default)]
    #[validate(range(min = 0, message = "Initial quantity cannot be negative"))]
    pub initial_quantity: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProductUpdateRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1 to 200 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 100))]
    pub product_type: Option<String>,

    #[validate(length(max = 5000))]
    pub description: Option<String>,

    #[validate(length(max = 20, message = "At most 20 tags"))]
    pub tags: Option<Vec<String>>,

    #[validate(range(min = 0, message = "Price cannot be negative"))]
    pub price_cents: Option<i64>,

    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub is_active: bool,
}

/// `?threshold=` on inventory views
#[derive(Debug, Default, Deserialize)]
pub struct ThresholdQuery {
    pub threshold: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StockRequest {
    pub change: StockChange,

    #[validate(length(max = 255, message = "Reason must be at most 255 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BulkStockRequest {
    #[validate(length(min = 1, max = 100, message = "Send 1 to 100 items"))]
    pub items: Vec<BulkItem>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UndoRequest {
    pub reason: Option<String>,
}

/// Product with its stock level for the seller
#[derive(Debug, Serialize)]
pub struct SellerProduct {
    #[serde(flatten)]
    pub product: Product,
    pub stock_level: StockLevel,
}

impl SellerProduct {
    fn new(product: Product, threshold: i64) -> Self {
        let stock_level = product.stock_level(threshold);
        Self { product, stock_level }
    }
}

#[derive(Debug, Serialize)]
pub struct StockChanged {
    pub entry: StockUpdate,
    pub product: SellerProduct,
}

impl StockChanged {
    fn new(applied: AppliedChange, threshold: i64) -> Self {
        Self {
            entry: applied.update,
            product: SellerProduct::new(applied.product, threshold),
        }
    }
}

/// Outcome of one bulk item
#[derive(Debug, Serialize)]
pub struct BulkOutcome {
    pub product_id: Uuid,
    pub status: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<StockChanged>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkResponse {
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<BulkOutcome>,
}

#[derive(Debug, Serialize)]
pub struct InventoryView {
    #[serde(flatten)]
    pub summary: InventorySummary,
    pub threshold: i64,
}

/// Loads the caller's shop and checks the operation against it
async fn own_shop(state: &AppState, auth: &AuthContext, operation: Operation) -> ApiResult<Shop> {
    let shop = Shop::find_by_owner(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("You have not created a shop yet".to_string()))?;

    authorize(auth, operation, Some(shop.owner_id))?;

    Ok(shop)
}

async fn own_product(
    state: &AppState,
    auth: &AuthContext,
    operation: Operation,
    product_id: Uuid,
) -> ApiResult<(Shop, Product)> {
    let shop = own_shop(state, auth, operation).await?;
    let product = Product::find_for_owner(&state.db, product_id, auth.user_id)
        .await?
        .filter(|p| p.shop_id == shop.id)
        .ok_or_else(|| not_found("Product"))?;

    Ok((shop, product))
}

fn threshold_or_default(state: &AppState, query: &ThresholdQuery) -> ApiResult<i64> {
    match query.threshold {
        Some(t) if t < 0 => Err(ApiError::validation("threshold", "Threshold cannot be negative")),
        Some(t) => Ok(t),
        None => Ok(state.low_stock_threshold()),
    }
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    let mut tags: Vec<String> = tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    tags.sort();
    tags.dedup();
    tags
}

pub async fn create_shop(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ShopRequest>,
) -> ApiResult<(StatusCode, Json<ShopWithCycle>)> {
    authorize(&auth, Operation::CreateShop, None)?;
    let req = validated(req)?;

    let (shop, verification) = verification::create_shop(
        &state.db,
        auth.user_id,
        CreateShop {
            name: req.name.trim().to_string(),
            description: trimmed(req.description),
            address: trimmed(req.address),
            region: trimmed(req.region),
            district: trimmed(req.district),
            town: trimmed(req.town),
            phone: trimmed(req.phone),
            email: trimmed(req.email),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(ShopWithCycle { shop, verification })))
}

pub async fn get_shop(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Shop>> {
    Ok(Json(own_shop(&state, &auth, Operation::ViewInventory).await?))
}

pub async fn update_shop(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ShopUpdateRequest>,
) -> ApiResult<Json<Shop>> {
    let shop = own_shop(&state, &auth, Operation::UpdateShop).await?;
    let req = validated(req)?;

    let shop = Shop::update_details(
        &state.db,
        shop.id,
        UpdateShop {
            name: trimmed(req.name),
            description: trimmed(req.description),
            address: trimmed(req.address),
            region: trimmed(req.region),
            district: trimmed(req.district),
            town: trimmed(req.town),
            phone: trimmed(req.phone),
            email: trimmed(req.email),
        },
    )
    .await?
    .ok_or_else(|| not_found("Shop"))?;

    tracing::info!(shop_id = %shop.id, "Shop details updated");

    Ok(Json(shop))
}

pub async fn verification_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<VerificationOverview>> {
    let shop = own_shop(&state, &auth, Operation::ViewInventory).await?;
    Ok(Json(verification::overview(&state.db, &state.otp, shop).await?))
}

pub async fn list_followers(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<ShopFollower>>> {
    let shop = own_shop(&state, &auth, Operation::ViewFollowers).await?;

    let followers = ShopFollow::list_followers(
        &state.db,
        shop.id,
        pagination.limit(),
        pagination.offset(),
    )
    .await?;
    let total = ShopFollow::count_followers(&state.db, shop.id).await?;

    Ok(Json(Page::new(followers, &pagination).with_total(total)))
}

/// Confirms the code an admin sent to the shop contact
///
/// # Errors
///
/// - `422`: Code is not six digits
/// - `400`: Wrong code (message carries the attempts left)
/// - `410`: Code expired or superseded
/// - `409`: Code already used, or shop not awaiting a code
/// - `429`: Too many wrong attempts
pub async fn confirm_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ConfirmRequest>,
) -> ApiResult<Json<ShopWithCycle>> {
    let shop = own_shop(&state, &auth, Operation::ConfirmVerification).await?;

    let submitted = req.code.trim();
    if !code::is_well_formed(submitted) {
        return Err(ApiError::validation("code", "Code must be 6 digits"));
    }

    let (shop, verification) =
        verification::confirm(&state.db, &state.otp, shop.id, auth.user_id, submitted).await?;

    Ok(Json(ShopWithCycle { shop, verification }))
}

pub async fn resubmit_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<ShopWithCycle>> {
    let shop = own_shop(&state, &auth, Operation::ResubmitVerification).await?;
    let (shop, verification) = verification::resubmit(&state.db, shop.id, auth.user_id).await?;

    Ok(Json(ShopWithCycle { shop, verification }))
}

/// Inventory listing with stock filters
///
/// `?search=&in_stock=&low_stock=&out_of_stock=&include_inactive=&threshold=&limit=&offset=`
pub async fn list_products(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<SellerProductFilter>,
    Query(threshold): Query<ThresholdQuery>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<SellerProduct>>> {
    let shop = own_shop(&state, &auth, Operation::ViewInventory).await?;
    let threshold = threshold_or_default(&state, &threshold)?;

    let products = Product::list_for_shop(
        &state.db,
        shop.id,
        &filter,
        threshold,
        pagination.limit(),
        pagination.offset(),
    )
    .await?
    .into_iter()
    .map(|p| SellerProduct::new(p, threshold))
    .collect();

    Ok(Json(Page::new(products, &pagination)))
}

pub async fn create_product(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<ProductRequest>,
) -> ApiResult<(StatusCode, Json<SellerProduct>)> {
    let shop = own_shop(&state, &auth, Operation::ManageProducts).await?;
    let req = validated(req)?;

    let product = ledger::create_product(
        &state.db,
        shop.id,
        CreateProduct {
            name: req.name.trim().to_string(),
            product_type: trimmed(req.product_type),
            description: trimmed(req.description),
            tags: clean_tags(req.tags),
            price_cents: req.price_cents,
            category_id: req.category_id,
        },
        req.initial_quantity,
        auth.user_id,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(SellerProduct::new(product, state.low_stock_threshold())),
    ))
}

pub async fn get_product(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<SellerProduct>> {
    let (_, product) = own_product(&state, &auth, Operation::ViewInventory, product_id).await?;
    Ok(Json(SellerProduct::new(product, state.low_stock_threshold())))
}

/// Updates product details; stock only moves through the ledger
pub async fn update_product(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<ProductUpdateRequest>,
) -> ApiResult<Json<SellerProduct>> {
    let (_, product) = own_product(&state, &auth, Operation::ManageProducts, product_id).await?;
    let req = validated(req)?;

    let product = Product::update_details(
        &state.db,
        product.id,
        UpdateProduct {
            name: trimmed(req.name),
            product_type: trimmed(req.product_type),
            description: trimmed(req.description),
            tags: req.tags.map(clean_tags),
            price_cents: req.price_cents,
            category_id: req.category_id,
        },
    )
    .await?
    .ok_or_else(|| not_found("Product"))?;

    Ok(Json(SellerProduct::new(product, state.low_stock_threshold())))
}

/// Soft-activates or deactivates a product; its ledger is kept either way
pub async fn set_product_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<ActiveRequest>,
) -> ApiResult<Json<SellerProduct>> {
    let (_, product) = own_product(&state, &auth, Operation::ManageProducts, product_id).await?;

    let product = Product::set_active(&state.db, product.id, req.is_active)
        .await?
        .ok_or_else(|| not_found("Product"))?;

    tracing::info!(product_id = %product.id, is_active = product.is_active, "Product activity changed");

    Ok(Json(SellerProduct::new(product, state.low_stock_threshold())))
}

/// Applies a stock change
///
/// ```text
/// POST /v1/seller/products/:id/stock
///
/// { "change": { "mode": "delta", "value": -5 }, "reason": "market day sales" }
/// { "change": { "mode": "set_to", "value": 40 } }
/// ```
pub async fn update_stock(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
    Json(req): Json<StockRequest>,
) -> ApiResult<Json<StockChanged>> {
    let shop = own_shop(&state, &auth, Operation::UpdateStock).await?;
    let req = validated(req)?;

    let applied = ledger::apply(
        &state.db,
        product_id,
        req.change,
        auth.user_id,
        req.reason.as_deref(),
        Some(shop.id),
    )
    .await?;

    Ok(Json(StockChanged::new(applied, state.low_stock_threshold())))
}

/// Applies several stock changes independently
///
/// Answers `200` when every item succeeded and `207 Multi-Status` otherwise;
/// each outcome carries its own status.
pub async fn bulk_update_stock(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<BulkStockRequest>,
) -> ApiResult<(StatusCode, Json<BulkResponse>)> {
    let shop = own_shop(&state, &auth, Operation::UpdateStock).await?;
    let req = validated(req)?;

    if let Some(i) = req
        .items
        .iter()
        .position(|item| item.reason.as_ref().is_some_and(|r| r.chars().count() > MAX_REASON_LENGTH))
    {
        return Err(ApiError::validation(
            format!("items[{}].reason", i),
            "Reason must be at most 255 characters",
        ));
    }

    let threshold = state.low_stock_threshold();
    let results = ledger::apply_bulk(&state.db, &req.items, auth.user_id, Some(shop.id)).await;

    let outcomes: Vec<BulkOutcome> = req
        .items
        .iter()
        .zip(results)
        .map(|(item, result)| match result {
            Ok(applied) => BulkOutcome {
                product_id: item.product_id,
                status: StatusCode::OK.as_u16(),
                result: Some(StockChanged::new(applied, threshold)),
                error: None,
                message: None,
            },
            Err(e) => {
                let api = ApiError::from(e);
                BulkOutcome {
                    product_id: item.product_id,
                    status: api.status().as_u16(),
                    result: None,
                    error: Some(api.code().to_string()),
                    message: Some(api.client_message()),
                }
            }
        })
        .collect();

    let failed = outcomes.iter().filter(|o| o.result.is_none()).count();
    let succeeded = outcomes.len() - failed;
    let status = if failed == 0 {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };

    tracing::info!(shop_id = %shop.id, succeeded, failed, "Bulk stock update applied");

    Ok((
        status,
        Json(BulkResponse {
            succeeded,
            failed,
            results: outcomes,
        }),
    ))
}

/// Appends the inverse of a ledger entry
pub async fn undo_stock(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(entry_id): Path<Uuid>,
    body: Option<Json<UndoRequest>>,
) -> ApiResult<Json<StockChanged>> {
    let shop = own_shop(&state, &auth, Operation::UndoStock).await?;
    let reason = body.and_then(|Json(req)| trimmed(req.reason));

    let applied = ledger::undo(
        &state.db,
        entry_id,
        auth.user_id,
        reason.as_deref(),
        Some(shop.id),
    )
    .await?;

    Ok(Json(StockChanged::new(applied, state.low_stock_threshold())))
}

/// Ledger history of one product, newest first
pub async fn stock_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Vec<StockUpdate>>> {
    let (_, product) = own_product(&state, &auth, Operation::ViewInventory, product_id).await?;

    let entries =
        ledger::history(&state.db, product.id, pagination.limit, pagination.offset).await?;

    Ok(Json(entries))
}

/// Latest ledger entries across the shop
pub async fn recent_stock(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Vec<StockUpdate>>> {
    let shop = own_shop(&state, &auth, Operation::ViewInventory).await?;
    Ok(Json(
        StockUpdate::recent_for_shop(&state.db, shop.id, pagination.limit()).await?,
    ))
}

pub async fn inventory_summary(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ThresholdQuery>,
) -> ApiResult<Json<InventoryView>> {
    let shop = own_shop(&state, &auth, Operation::ViewInventory).await?;
    let threshold = threshold_or_default(&state, &query)?;

    let summary = Product::inventory_summary(&state.db, shop.id, threshold).await?;

    Ok(Json(InventoryView { summary, threshold }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_tags() {
        let tags = clean_tags(vec![
            " Fruit ".to_string(),
            "fruit".to_string(),
            "".to_string(),
            "Organic".to_string(),
        ]);
        assert_eq!(tags, vec!["fruit", "organic"]);
    }

    #[test]
    fn test_stock_request_shape() {
        let req: StockRequest = serde_json::from_value(serde_json::json!({
            "change": { "mode": "delta", "value": -5 },
            "reason": "sold at market"
        }))
        .unwrap();
        assert_eq!(req.change, StockChange::Delta(-5));

        let req: StockRequest = serde_json::from_value(serde_json::json!({
            "change": { "mode": "set_to", "value": 40 }
        }))
        .unwrap();
        assert_eq!(req.change, StockChange::SetTo(40));
        assert!(req.reason.is_none());
    }

    #[test]
    fn test_product_request_rejects_negative_values() {
        let req: ProductRequest = serde_json::from_value(serde_json::json!({
            "name": "Mangoes",
            "price_cents": -1,
            "initial_quantity": -3
        }))
        .unwrap();

        let err = req.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("price_cents"));
        assert!(fields.contains_key("initial_quantity"));
    }

    #[test]
    fn test_bulk_request_bounds() {
        let empty = BulkStockRequest { items: vec![] };
        assert!(empty.validate().is_err());

        let item = BulkItem {
            product_id: Uuid::new_v4(),
            change: StockChange::Delta(1),
            reason: None,
        };
        let one = BulkStockRequest {
            items: vec![item.clone()],
        };
        assert!(one.validate().is_ok());

        let too_many = BulkStockRequest {
            items: vec![item; MAX_BULK_ITEMS + 1],
        };
        let err = too_many.validate().unwrap_err();
        assert!(err.field_errors().contains_key("items"));
    }

    #[test]
    fn test_shop_request_validation() {
        let req: ShopRequest = serde_json::from_value(serde_json::json!({
            "name": "",
            "email": "nope",
            "phone": "12"
        }))
        .unwrap();

        let err = req.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("phone"));
    }
}
