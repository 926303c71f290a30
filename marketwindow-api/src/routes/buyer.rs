/// Buyer endpoints
///
/// # Endpoints
///
/// - `GET    /v1/buyer/following` - Followed shops that are still visible
/// - `GET    /v1/buyer/following/:shop_id` - Whether the buyer follows a shop
/// - `PUT    /v1/buyer/following/:shop_id` - Follow a visible shop
/// - `DELETE /v1/buyer/following/:shop_id` - Unfollow

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::{not_found, Page, Pagination},
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
    models::{
        shop::{Shop, ShopListing},
        shop_follow::ShopFollow,
    },
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct FollowStatus {
    pub shop_id: Uuid,
    pub following: bool,
}

pub async fn list_following(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Page<ShopListing>>> {
    authorize(&auth, Operation::ViewFollowing, None)?;

    let shops = ShopFollow::list_following(
        &state.db,
        auth.user_id,
        pagination.limit(),
        pagination.offset(),
    )
    .await?;

    Ok(Json(Page::new(shops, &pagination)))
}

pub async fn follow_status(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<Json<FollowStatus>> {
    authorize(&auth, Operation::ViewFollowing, None)?;

    let following = ShopFollow::is_following(&state.db, auth.user_id, shop_id).await?;

    Ok(Json(FollowStatus { shop_id, following }))
}

/// Follows a shop
///
/// # Errors
///
/// - `404 Not Found`: Shop does not exist or is not publicly visible
/// - `409 Conflict`: Already following
pub async fn follow_shop(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<ShopFollow>)> {
    authorize(&auth, Operation::FollowShop, None)?;

    Shop::find_visible(&state.db, shop_id)
        .await?
        .ok_or_else(|| not_found("Shop"))?;

    let follow = ShopFollow::follow(&state.db, auth.user_id, shop_id)
        .await?
        .ok_or_else(|| ApiError::Conflict("Already following this shop".to_string()))?;

    tracing::debug!(user_id = %auth.user_id, shop_id = %shop_id, "Shop followed");

    Ok((StatusCode::CREATED, Json(follow)))
}

pub async fn unfollow_shop(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(shop_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    authorize(&auth, Operation::FollowShop, None)?;

    if !ShopFollow::unfollow(&state.db, auth.user_id, shop_id).await? {
        return Err(ApiError::NotFound("Not following this shop".to_string()));
    }

    Ok(StatusCode::NO_CONTENT)
}
