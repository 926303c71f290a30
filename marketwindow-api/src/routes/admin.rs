/// Admin endpoints
///
/// Mounted under `/v1/admin` behind the JWT layer and an admin role gate.
/// Admins drive shop verification (send a code, reject, annotate), moderate
/// shops, manage categories and users, and audit stock ledgers. They never
/// write stock.
///
/// # Endpoints
///
/// - `GET  /shops?status=&is_active=&search=`, `GET /shops/pending`
/// - `GET  /shops/:id`, `GET /shops/:id/verifications`
/// - `POST /shops/:id/verification/send-otp`
/// - `POST /shops/:id/verification/reject` `{ "reason": "..." }`
/// - `PUT  /shops/:id/verification/notes` `{ "notes": "..." }`
/// - `PUT  /shops/:id/active`, `PUT /shops/:id/promoted`
/// - `GET  /categories`, `POST /categories`, `PATCH /categories/:id`
/// - `GET  /products/:id/stock`, `GET /products/:id/reconcile`
/// - `GET  /users?role=`, `PUT /users/:id/active`

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
    ledger::{self, Reconciliation},
    models::{
        category::{Category, UpdateCategory},
        otp::Otp,
        shop::{AdminShopFilter, Shop},
        shop_verification::ShopVerification,
        stock_update::StockUpdate,
        user::{User, UserRole},
    },
    otp::delivery::mask_destination,
    verification::{self, CodeSent},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct ShopReview {
    pub shop: Shop,
    pub verification: Option<ShopVerification>,
    pub history: Vec<ShopVerification>,
}

/// Send-code result; the code itself only goes to the shop contact
#[derive(Debug, Serialize)]
pub struct CodeSentResponse {
    pub shop: Shop,
    pub verification: ShopVerification,
    pub otp: Otp,
    pub sent_to: String,
}

impl From<CodeSent> for CodeSentResponse {
    fn from(sent: CodeSent) -> Self {
        let sent_to = sent
            .otp
            .destination
            .as_deref()
            .map(mask_destination)
            .unwrap_or_default();

        Self {
            shop: sent.shop,
            verification: sent.cycle,
            otp: sent.otp,
            sent_to,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Decision {
    pub shop: Shop,
    pub verification: ShopVerification,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RejectRequest {
    #[validate(length(min = 1, max = 1000, message = "Reason must be 1 to 1000 characters"))]
    pub reason: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NotesRequest {
    #[validate(length(max = 5000, message = "Notes must be at most 5000 characters"))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActiveRequest {
    pub is_active: bool,
}

#[derive(Debug, Deserialize)]
pub struct PromotedRequest {
    pub promoted: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1 to 100 characters"))]
    pub name: String,

    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryUpdateRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1 to 100 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 1000))]
    pub description: Option<String>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserQuery {
    pub role: Option<UserRole>,
}

async fn find_shop(state: &AppState, shop_id: Uuid) -> ApiResult<Shop> {
    Shop::find_by_id(&state.db, shop_id)
        .await?
        .ok_or_else(|| not_found("Shop"))
}

pub async fn list_shops(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<AdminShopFilter>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<Shop>>> {
    authorize(&auth, Operation::ReviewShops, None)?;

    let shops =
        Shop::list_for_admin(&state.db, &filter, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(shops, &pagination)))
}

/// Shops with an open verification cycle, oldest first
pub async fn pending_shops(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Shop>>> {
    authorize(&auth, Operation::ReviewShops, None)?;
    Ok(Json(Shop::list_awaiting_review(&state.db).await?))
}

pub async fn get_shop(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<Json<ShopReview>> {
    authorize(&auth, Operation::ReviewShops, None)?;

    let shop = find_shop(&state, shop_id).await?;
    let history = verification::history(&state.db, shop.id).await?;

    Ok(Json(ShopReview {
        shop,
        verification: history.first().cloned(),
        history,
    }))
}

pub async fn verification_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<Json<Vec<ShopVerification>>> {
    authorize(&auth, Operation::ReviewShops, None)?;
    find_shop(&state, shop_id).await?;

    Ok(Json(verification::history(&state.db, shop_id).await?))
}

/// Issues a verification code to the shop's phone or email
///
/// Re-sending while a code is outstanding supersedes the old code.
///
/// # Errors
///
/// - `404`: Shop not found
/// - `409`: Shop not pending, or has no contact to send to
/// - `503`: Delivery failed (nothing is recorded)
pub async fn send_verification_code(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<Json<CodeSentResponse>> {
    authorize(&auth, Operation::SendVerificationCode, None)?;

    let sent = verification::send_otp(
        &state.db,
        &state.otp,
        state.delivery.as_ref(),
        shop_id,
        auth.user_id,
    )
    .await?;

    Ok(Json(sent.into()))
}

pub async fn reject_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
    Json(req): Json<RejectRequest>,
) -> ApiResult<Json<Decision>> {
    authorize(&auth, Operation::RejectVerification, None)?;
    let req = validated(req)?;

    let (shop, verification) =
        verification::reject(&state.db, &state.otp, shop_id, auth.user_id, &req.reason).await?;

    Ok(Json(Decision { shop, verification }))
}

pub async fn annotate_verification(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
    Json(req): Json<NotesRequest>,
) -> ApiResult<Json<ShopVerification>> {
    authorize(&auth, Operation::AnnotateVerification, None)?;
    let req = validated(req)?;

    Ok(Json(
        verification::annotate(&state.db, shop_id, req.notes.as_deref()).await?,
    ))
}

/// Hides or re-shows a shop without touching its verification
pub async fn set_shop_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
    Json(req): Json<ActiveRequest>,
) -> ApiResult<Json<Shop>> {
    authorize(&auth, Operation::ModerateShop, None)?;

    let shop = Shop::set_active(&state.db, shop_id, req.is_active)
        .await?
        .ok_or_else(|| not_found("Shop"))?;

    tracing::info!(shop_id = %shop.id, admin_id = %auth.user_id, is_active = shop.is_active, "Shop activity changed");

    Ok(Json(shop))
}

pub async fn set_shop_promoted(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
    Json(req): Json<PromotedRequest>,
) -> ApiResult<Json<Shop>> {
    authorize(&auth, Operation::ModerateShop, None)?;

    let shop = Shop::set_promoted(&state.db, shop_id, req.promoted)
        .await?
        .ok_or_else(|| not_found("Shop"))?;

    Ok(Json(shop))
}

/// All categories, including inactive ones
pub async fn list_categories(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Category>>> {
    authorize(&auth, Operation::ManageCategories, None)?;
    Ok(Json(Category::list(&state.db, false).await?))
}

pub async fn create_category(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(req): Json<CategoryRequest>,
) -> ApiResult<(StatusCode, Json<Category>)> {
    authorize(&auth, Operation::ManageCategories, None)?;
    let req = validated(req)?;

    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::validation("name", "Name must not be blank"));
    }

    let category = Category::create(&state.db, name, trimmed(req.description).as_deref()).await?;

    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn update_category(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(category_id): Path<Uuid>,
    Json(req): Json<CategoryUpdateRequest>,
) -> ApiResult<Json<Category>> {
    authorize(&auth, Operation::ManageCategories, None)?;
    let req = validated(req)?;

    let category = Category::update(
        &state.db,
        category_id,
        UpdateCategory {
            name: trimmed(req.name),
            description: trimmed(req.description),
            is_active: req.is_active,
        },
    )
    .await?
    .ok_or_else(|| not_found("Category"))?;

    Ok(Json(category))
}

/// Read-only view of any product's ledger
pub async fn stock_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Vec<StockUpdate>>> {
    authorize(&auth, Operation::AuditStock, None)?;

    Ok(Json(
        ledger::history(&state.db, product_id, pagination.limit, pagination.offset).await?,
    ))
}

/// Checks that a product's quantity equals the sum of its ledger
pub async fn reconcile_stock(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(product_id): Path<Uuid>,
) -> ApiResult<Json<Reconciliation>> {
    authorize(&auth, Operation::AuditStock, None)?;
    Ok(Json(ledger::reconcile(&state.db, product_id).await?))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<UserQuery>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<User>>> {
    authorize(&auth, Operation::ManageUsers, None)?;

    let users =
        User::list(&state.db, query.role, pagination.limit(), pagination.offset()).await?;

    Ok(Json(Page::new(users, &pagination)))
}

/// Enables or disables an account; admins cannot disable themselves
pub async fn set_user_active(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ActiveRequest>,
) -> ApiResult<Json<User>> {
    authorize(&auth, Operation::ManageUsers, None)?;

    if user_id == auth.user_id && !req.is_active {
        return Err(ApiError::Conflict("You cannot disable your own account".to_string()));
    }

    let user = User::set_active(&state.db, user_id, req.is_active)
        .await?
        .ok_or_else(|| not_found("User"))?;

    tracing::info!(user_id = %user.id, admin_id = %auth.user_id, is_active = user.is_active, "Account activity changed");

    Ok(Json(user))
}
