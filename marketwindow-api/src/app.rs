/// Application state and router builder
///
/// # Example
///
/// ```no_run
/// use marketwindow_api::{app::{build_router, AppState}, config::Config};
/// use marketwindow_shared::otp::delivery::LogDelivery;
/// use sqlx::PgPool;
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let pool = PgPool::connect(&config.database.url).await?;
/// let state = AppState::new(pool, config, Arc::new(LogDelivery::new()))?;
///
/// let app = build_router(state);
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// axum::serve(listener, app).await?;
/// # Ok(())
/// # }
/// ```

use crate::{config::{AdminBootstrap, Config}, middleware::security::SecurityHeadersLayer, routes};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, patch, post, put},
    Router,
};
use marketwindow_shared::{
    auth::{
        middleware::{create_active_account_gate, create_jwt_middleware, create_role_gate},
        password,
    },
    models::user::{CreateUser, User, UserRole},
    otp::{delivery::OtpDelivery, OtpError, OtpIssuer},
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned into every handler through axum's `State` extractor; all fields
/// are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    /// One-time code issuer keyed by the server secret
    pub otp: OtpIssuer,

    /// Channel codes are delivered through
    pub delivery: Arc<dyn OtpDelivery>,
}

impl AppState {
    /// Creates application state
    ///
    /// # Errors
    ///
    /// Fails if the OTP settings are unusable.
    pub fn new(
        db: PgPool,
        config: Config,
        delivery: Arc<dyn OtpDelivery>,
    ) -> Result<Self, OtpError> {
        let otp = OtpIssuer::new(
            config.auth.secret.as_bytes(),
            config.otp.ttl_minutes,
            config.otp.max_attempts,
        )?;

        Ok(Self {
            db,
            config: Arc::new(config),
            otp,
            delivery,
        })
    }

    /// JWT signing secret
    pub fn jwt_secret(&self) -> &str {
        &self.config.auth.secret
    }

    /// Default low-stock threshold for inventory views
    pub fn low_stock_threshold(&self) -> i64 {
        self.config.inventory.low_stock_threshold
    }
}

/// Builds the complete router
///
/// ```text
/// /health                                   GET    public
/// /v1/auth/register | login | refresh       POST   public
/// /v1/auth/password-reset/{request,confirm} POST   public
/// /v1/auth/me                               GET    any role
/// /v1/shops, /v1/products, /v1/categories   GET    public, verified shops only
/// /v1/seller/...                            seller role
/// /v1/admin/...                             admin role
/// /v1/buyer/...                             buyer role
/// ```
///
/// Role-prefixed routers run the JWT layer first, then a role gate, then the
/// active account gate for mutating requests. Handlers additionally check the
/// operation (and shop ownership) they perform.
pub fn build_router(state: AppState) -> Router {
    let secret = state.jwt_secret().to_string();

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/register", post(routes::auth::register))
        .route("/login", post(routes::auth::login))
        .route("/refresh", post(routes::auth::refresh))
        .route(
            "/password-reset/request",
            post(routes::auth::request_password_reset),
        )
        .route(
            "/password-reset/confirm",
            post(routes::auth::confirm_password_reset),
        )
        .merge(
            Router::new()
                .route("/me", get(routes::auth::me))
                .layer(middleware::from_fn(create_jwt_middleware(secret.clone()))),
        );

    let catalogue_routes = Router::new()
        .route("/shops", get(routes::catalogue::list_shops))
        .route("/shops/:shop_id", get(routes::catalogue::get_shop))
        .route("/shops/:shop_id/products", get(routes::catalogue::list_shop_products))
        .route("/products", get(routes::catalogue::search_products))
        .route("/products/:product_id", get(routes::catalogue::get_product))
        .route("/categories", get(routes::catalogue::list_categories));

    let seller_routes = Router::new()
        .route(
            "/shop",
            post(routes::seller::create_shop)
                .get(routes::seller::get_shop)
                .patch(routes::seller::update_shop),
        )
        .route("/shop/followers", get(routes::seller::list_followers))
        .route("/shop/verification", get(routes::seller::verification_status))
        .route(
            "/shop/verification/confirm",
            post(routes::seller::confirm_verification),
        )
        .route(
            "/shop/verification/resubmit",
            post(routes::seller::resubmit_verification),
        )
        .route(
            "/products",
            get(routes::seller::list_products).post(routes::seller::create_product),
        )
        .route(
            "/products/:product_id",
            get(routes::seller::get_product).patch(routes::seller::update_product),
        )
        .route(
            "/products/:product_id/active",
            put(routes::seller::set_product_active),
        )
        .route(
            "/products/:product_id/stock",
            get(routes::seller::stock_history).post(routes::seller::update_stock),
        )
        .route("/stock/bulk", post(routes::seller::bulk_update_stock))
        .route("/stock/recent", get(routes::seller::recent_stock))
        .route("/stock/:entry_id/undo", post(routes::seller::undo_stock))
        .route("/inventory/summary", get(routes::seller::inventory_summary))
        .layer(middleware::from_fn(create_active_account_gate(state.db.clone())))
        .layer(middleware::from_fn(create_role_gate(&[UserRole::Seller])))
        .layer(middleware::from_fn(create_jwt_middleware(secret.clone())));

    let admin_routes = Router::new()
        .route("/shops", get(routes::admin::list_shops))
        .route("/shops/pending", get(routes::admin::pending_shops))
        .route("/shops/:shop_id", get(routes::admin::get_shop))
        .route(
            "/shops/:shop_id/verifications",
            get(routes::admin::verification_history),
        )
        .route(
            "/shops/:shop_id/verification/send-otp",
            post(routes::admin::send_verification_code),
        )
        .route(
            "/shops/:shop_id/verification/reject",
            post(routes::admin::reject_verification),
        )
        .route(
            "/shops/:shop_id/verification/notes",
            put(routes::admin::annotate_verification),
        )
        .route("/shops/:shop_id/active", put(routes::admin::set_shop_active))
        .route("/shops/:shop_id/promoted", put(routes::admin::set_shop_promoted))
        .route(
            "/categories",
            get(routes::admin::list_categories).post(routes::admin::create_category),
        )
        .route("/categories/:category_id", patch(routes::admin::update_category))
        .route("/products/:product_id/stock", get(routes::admin::stock_history))
        .route(
            "/products/:product_id/reconcile",
            get(routes::admin::reconcile_stock),
        )
        .route("/users", get(routes::admin::list_users))
        .route("/users/:user_id/active", put(routes::admin::set_user_active))
        .layer(middleware::from_fn(create_active_account_gate(state.db.clone())))
        .layer(middleware::from_fn(create_role_gate(&[UserRole::Admin])))
        .layer(middleware::from_fn(create_jwt_middleware(secret.clone())));

    let buyer_routes = Router::new()
        .route("/following", get(routes::buyer::list_following))
        .route(
            "/following/:shop_id",
            get(routes::buyer::follow_status)
                .put(routes::buyer::follow_shop)
                .delete(routes::buyer::unfollow_shop),
        )
        .layer(middleware::from_fn(create_active_account_gate(state.db.clone())))
        .layer(middleware::from_fn(create_role_gate(&[UserRole::Buyer])))
        .layer(middleware::from_fn(create_jwt_middleware(secret)));

    let v1_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(catalogue_routes)
        .nest("/seller", seller_routes)
        .nest("/admin", admin_routes)
        .nest("/buyer", buyer_routes);

    let cors = cors_layer(&state.config.api.cors_origins);
    let production = state.config.api.is_production();

    Router::new()
        .merge(health_routes)
        .nest("/v1", v1_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(SecurityHeadersLayer::new(production))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Creates the configured admin account unless an admin already exists
///
/// Returns the created user, or `None` when nothing was done.
pub async fn bootstrap_admin(
    pool: &PgPool,
    admin: &AdminBootstrap,
) -> anyhow::Result<Option<User>> {
    if User::admin_exists(pool).await? {
        tracing::debug!("Admin account already present, skipping bootstrap");
        return Ok(None);
    }

    password::validate_password_strength(&admin.password)
        .map_err(|e| anyhow::anyhow!("ADMIN_PASSWORD is too weak: {}", e))?;

    let user = User::create(
        pool,
        CreateUser {
            email: admin.email.clone(),
            username: admin.username.clone(),
            password_hash: password::hash_password(&admin.password)?,
            role: UserRole::Admin,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, email = %user.email, "Bootstrap admin account created");

    Ok(Some(user))
}
