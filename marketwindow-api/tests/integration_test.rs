/// Integration tests for the MarketWindow API
///
/// The first group runs without a database: auth and role gates answer
/// before any query. The second group needs `DATABASE_URL` and walks the
/// seller, admin and buyer flows end to end.

mod common;

use axum::http::{Method, StatusCode};
use common::{create_account, token_for, TestApp};
use marketwindow_shared::models::user::UserRole;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
async fn test_protected_routes_require_token() {
    let app = TestApp::offline();

    for uri in [
        "/v1/auth/me",
        "/v1/seller/shop",
        "/v1/admin/shops",
        "/v1/buyer/following",
    ] {
        let (status, body) = app.send(Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["error"], "unauthorized", "{uri}");
    }
}

#[tokio::test]
async fn test_invalid_token_is_rejected() {
    let app = TestApp::offline();

    let (status, _) = app
        .send(Method::GET, "/v1/admin/shops", Some("not.a.jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_role_gates_fail_closed() {
    let app = TestApp::offline();
    let seller = token_for(UserRole::Seller);
    let buyer = token_for(UserRole::Buyer);
    let admin = token_for(UserRole::Admin);

    let cases = [
        (Method::GET, "/v1/admin/shops", &seller),
        (Method::GET, "/v1/admin/users", &buyer),
        (Method::GET, "/v1/seller/shop", &buyer),
        (Method::GET, "/v1/seller/shop", &admin),
        (Method::POST, "/v1/seller/stock/bulk", &admin),
        (Method::GET, "/v1/buyer/following", &seller),
        (Method::GET, "/v1/buyer/following", &admin),
    ];

    for (method, uri, token) in cases {
        let (status, body) = app.send(method, uri, Some(token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["error"], "forbidden", "{uri}");
    }
}

#[tokio::test]
async fn test_register_validation_runs_before_database() {
    let app = TestApp::offline();

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/register",
            None,
            Some(json!({ "email": "nope", "username": "ab", "password": "market-day-2024" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/register",
            None,
            Some(json!({
                "email": "root@example.com",
                "username": "root_user",
                "password": "market-day-2024",
                "role": "admin"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "role");
}

#[tokio::test]
async fn test_health_reports_degraded_without_database() {
    let app = TestApp::offline();

    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["database"], "disconnected");
}

// Database-backed flows

async fn register(app: &TestApp, role: &str) -> (Uuid, String) {
    let tag = Uuid::new_v4().simple().to_string();
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/register",
            None,
            Some(json!({
                "email": format!("{}-{}@example.com", role, &tag[..12]),
                "username": format!("{}_{}", role, &tag[..12]),
                "password": common::TEST_PASSWORD,
                "role": role
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let user_id = body["user"]["id"].as_str().unwrap().parse().unwrap();
    let token = body["access_token"].as_str().unwrap().to_string();
    (user_id, token)
}

/// Registers a seller and opens a shop; returns (shop_id, seller token)
async fn open_shop(app: &TestApp) -> (Uuid, String) {
    let (_, seller) = register(app, "seller").await;

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/shop",
            Some(&seller),
            Some(json!({
                "name": "Corner Greengrocer",
                "region": "North",
                "phone": "+15550100"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["shop"]["verification_status"], "pending");
    assert_eq!(body["verification"]["cycle"], 1);

    let shop_id = body["shop"]["id"].as_str().unwrap().parse().unwrap();
    (shop_id, seller)
}

#[tokio::test]
async fn test_register_login_and_me() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };

    let (user_id, token) = register(&app, "buyer").await;

    let (status, body) = app.send(Method::GET, "/v1/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], user_id.to_string());
    assert_eq!(body["role"], "buyer");
    assert!(body.get("password_hash").is_none());

    let email = body["email"].as_str().unwrap().to_string();
    let (status, _) = app
        .send(
            Method::POST,
            "/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": "wrong-password-1" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/auth/login",
            None,
            Some(json!({ "email": email, "password": common::TEST_PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["refresh_token"].is_string());
}

#[tokio::test]
async fn test_shop_verification_flow() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };
    let (shop_id, seller) = open_shop(&app).await;
    let (_, admin) = create_account(&app.db, UserRole::Admin).await;

    // Not visible until verified
    let (status, _) = app
        .send(Method::GET, &format!("/v1/shops/{shop_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/admin/shops/{shop_id}/verification/send-otp"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["shop"]["verification_status"], "otp_sent");
    assert!(body["otp"].get("code_hash").is_none());

    let code = app.delivery.last_code_for(shop_id).unwrap();

    // A wrong code counts an attempt and leaves the cycle open
    let wrong = if code == "000000" { "111111" } else { "000000" };
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/shop/verification/confirm",
            Some(&seller),
            Some(json!({ "code": wrong })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "otp_mismatch");

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/shop/verification/confirm",
            Some(&seller),
            Some(json!({ "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["shop"]["verification_status"], "verified");
    assert_eq!(body["verification"]["status"], "verified");

    // A spent code reports itself consumed
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/shop/verification/confirm",
            Some(&seller),
            Some(json!({ "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "otp_already_consumed");

    let (status, body) = app
        .send(Method::GET, &format!("/v1/shops/{shop_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Corner Greengrocer");
}

#[tokio::test]
async fn test_rejection_and_resubmission() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };
    let (shop_id, seller) = open_shop(&app).await;
    let (_, admin) = create_account(&app.db, UserRole::Admin).await;

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/v1/admin/shops/{shop_id}/verification/reject"),
            Some(&admin),
            Some(json!({ "reason": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/admin/shops/{shop_id}/verification/reject"),
            Some(&admin),
            Some(json!({ "reason": "Address could not be confirmed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["shop"]["verification_status"], "rejected");

    // Rejected shops cannot be rejected again
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/v1/admin/shops/{shop_id}/verification/reject"),
            Some(&admin),
            Some(json!({ "reason": "Again" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/shop/verification/resubmit",
            Some(&seller),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["verification"]["cycle"], 2);
    assert_eq!(body["shop"]["verification_status"], "pending");

    let (status, body) = app
        .send(
            Method::GET,
            &format!("/v1/admin/shops/{shop_id}/verifications"),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stock_ledger_apply_and_undo() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };
    let (_, seller) = open_shop(&app).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/products",
            Some(&seller),
            Some(json!({ "name": "Mangoes", "price_cents": 250, "initial_quantity": 10 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["quantity"], 10);
    let product_id = body["id"].as_str().unwrap().to_string();

    let stock_uri = format!("/v1/seller/products/{product_id}/stock");

    let (status, body) = app
        .send(
            Method::POST,
            &stock_uri,
            Some(&seller),
            Some(json!({ "change": { "mode": "delta", "value": -4 }, "reason": "sold" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["entry"]["delta"], -4);
    assert_eq!(body["product"]["quantity"], 6);
    let entry_id = body["entry"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/v1/seller/stock/{entry_id}/undo"),
            Some(&seller),
            Some(json!({ "reason": "miscounted" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["entry"]["delta"], 4);
    assert_eq!(body["entry"]["reverses_id"], entry_id.as_str());
    assert_eq!(body["product"]["quantity"], 10);

    // An entry is undone at most once
    let (status, _) = app
        .send(
            Method::POST,
            &format!("/v1/seller/stock/{entry_id}/undo"),
            Some(&seller),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Removals beyond what is on hand stop at zero
    let (status, body) = app
        .send(
            Method::POST,
            &stock_uri,
            Some(&seller),
            Some(json!({ "change": { "mode": "delta", "value": -15 } })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["entry"]["delta"], -10);
    assert_eq!(body["product"]["quantity"], 0);

    let (status, body) = app.send(Method::GET, &stock_uri, Some(&seller), None).await;
    assert_eq!(status, StatusCode::OK);
    let deltas: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["delta"].as_i64().unwrap())
        .collect();
    assert_eq!(deltas.len(), 4);
    assert_eq!(deltas.iter().sum::<i64>(), 0);
}

#[tokio::test]
async fn test_sellers_cannot_touch_other_shops_stock() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };
    let (_, owner) = open_shop(&app).await;
    let (_, intruder) = open_shop(&app).await;

    let (_, body) = app
        .send(
            Method::POST,
            "/v1/seller/products",
            Some(&owner),
            Some(json!({ "name": "Honey", "price_cents": 900, "initial_quantity": 3 })),
        )
        .await;
    let product_id = body["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(
            Method::POST,
            &format!("/v1/seller/products/{product_id}/stock"),
            Some(&intruder),
            Some(json!({ "change": { "mode": "set_to", "value": 0 } })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_buyer_follows_only_visible_shops() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };
    let (shop_id, _) = open_shop(&app).await;
    let (buyer_id, buyer) = register(&app, "buyer").await;
    let follow_uri = format!("/v1/buyer/following/{shop_id}");

    // Pending shops are invisible
    let (status, _) = app.send(Method::PUT, &follow_uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, admin) = create_account(&app.db, UserRole::Admin).await;
    app.send(
        Method::POST,
        &format!("/v1/admin/shops/{shop_id}/verification/send-otp"),
        Some(&admin),
        None,
    )
    .await;
    let code = app.delivery.last_code_for(shop_id).unwrap();
    // Verify through the owning seller's account
    let shop = marketwindow_shared::models::shop::Shop::find_by_id(&app.db, shop_id)
        .await
        .unwrap()
        .unwrap();
    let owner_token = marketwindow_shared::auth::jwt::issue_token_pair(
        shop.owner_id,
        UserRole::Seller,
        common::TEST_SECRET,
    )
    .unwrap()
    .access_token;
    let (status, _) = app
        .send(
            Method::POST,
            "/v1/seller/shop/verification/confirm",
            Some(&owner_token),
            Some(json!({ "code": code })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(Method::PUT, &follow_uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app.send(Method::PUT, &follow_uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .send(Method::GET, "/v1/buyer/following", Some(&buyer), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&Value> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| &s["id"])
        .collect();
    assert_eq!(ids, vec![&Value::String(shop_id.to_string())]);

    // The owner sees the follower without the buyer's email
    let (status, body) = app
        .send(Method::GET, "/v1/seller/shop/followers", Some(&owner_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["user_id"], buyer_id.to_string());
    assert!(body["items"][0].get("email").is_none());

    let (status, _) = app
        .send(Method::GET, "/v1/seller/shop/followers", Some(&buyer), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::DELETE, &follow_uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.send(Method::DELETE, &follow_uri, Some(&buyer), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deactivated_account_cannot_mutate() {
    let Some(app) = TestApp::with_database().await else {
        return;
    };
    let (seller, token) = create_account(&app.db, UserRole::Seller).await;
    let (_, admin) = create_account(&app.db, UserRole::Admin).await;

    let (status, body) = app
        .send(
            Method::PUT,
            &format!("/v1/admin/users/{}/active", seller.id),
            Some(&admin),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // The token is still valid, but writes re-check the account
    let (status, body) = app
        .send(
            Method::POST,
            "/v1/seller/shop",
            Some(&token),
            Some(json!({ "name": "Late Stall", "phone": "+15550199" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app
        .send(Method::GET, "/v1/seller/shop", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
