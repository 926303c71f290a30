/// Authentication middleware for Axum
///
/// Two layers, applied in this order on protected routers:
///
/// 1. **JWT authentication** validates the `Authorization: Bearer <token>`
///    header and inserts an [`AuthContext`] into request extensions.
/// 2. **Role gate** rejects requests whose role is not in the router's
///    allowed set with `403 Forbidden`. A request that reaches the gate with no
///    `AuthContext` is also rejected (fail closed).
/// 3. **Active account gate** re-reads the account on mutating requests, so a
///    deactivated account cannot change anything while its access token lives.
///    Reads keep working until the token expires.
///
/// # Example
///
/// ```no_run
/// use axum::{middleware, routing::get, Extension, Router};
/// use marketwindow_shared::auth::middleware::{create_jwt_middleware, create_role_gate, AuthContext};
/// use marketwindow_shared::models::user::UserRole;
///
/// async fn handler(Extension(auth): Extension<AuthContext>) -> String {
///     format!("Hello, {} {}!", auth.role, auth.user_id)
/// }
///
/// let app: Router = Router::new()
///     .route("/v1/admin/ping", get(handler))
///     .layer(middleware::from_fn(create_role_gate(&[UserRole::Admin])))
///     .layer(middleware::from_fn(create_jwt_middleware("secret")));
/// ```

use axum::{
    extract::Request,
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use super::jwt::{validate_access_token, JwtError};
use crate::models::user::{User, UserRole};
use sqlx::PgPool;

/// Authenticated identity added to request extensions
///
/// ```
/// use axum::Extension;
/// use marketwindow_shared::auth::middleware::AuthContext;
///
/// async fn handler(Extension(auth): Extension<AuthContext>) -> String {
///     format!("User: {}, Role: {}", auth.user_id, auth.role)
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl AuthContext {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Error type for authentication middleware
#[derive(Debug)]
pub enum AuthError {
    /// Missing authorization header
    MissingCredentials,

    /// Invalid authorization header format
    InvalidFormat(String),

    /// Token validation failed
    InvalidToken(String),

    /// Authenticated, but the role is not allowed here
    Forbidden,

    /// Token is valid but the account was deactivated or removed
    AccountDisabled,

    /// Account state could not be read
    Unavailable,
}

impl AuthError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AuthError::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing credentials".to_string(),
            ),
            AuthError::InvalidFormat(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AuthError::InvalidToken(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AuthError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "You do not have access to this resource".to_string(),
            ),
            AuthError::AccountDisabled => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Account is disabled".to_string(),
            ),
            AuthError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "Service temporarily unavailable".to_string(),
            ),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error, message) = self.parts();
        let body = Json(serde_json::json!({ "error": error, "message": message }));

        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, header::HeaderValue::from_static("Bearer"));
        }
        response
    }
}

/// JWT authentication middleware
///
/// # Errors
///
/// Returns 401 Unauthorized if the header is missing, the token is invalid,
/// expired, or not an access token; 400 if the header is not a Bearer token.
pub async fn jwt_auth_middleware(
    secret: String,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidFormat("Expected Bearer token".to_string()))?;

    let claims = validate_access_token(token.trim(), &secret).map_err(|e| match e {
        JwtError::Expired => AuthError::InvalidToken("Token expired".to_string()),
        JwtError::InvalidIssuer => AuthError::InvalidToken("Invalid issuer".to_string()),
        _ => AuthError::InvalidToken(format!("Invalid token: {}", e)),
    })?;

    req.extensions_mut()
        .insert(AuthContext::new(claims.sub, claims.role));

    Ok(next.run(req).await)
}

/// Role gate middleware
///
/// Must run after [`jwt_auth_middleware`].
pub async fn role_gate_middleware(
    allowed: &'static [UserRole],
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(auth) = req.extensions().get::<AuthContext>().copied() else {
        return Err(AuthError::MissingCredentials);
    };

    if !allowed.contains(&auth.role) {
        tracing::warn!(
            user_id = %auth.user_id,
            role = %auth.role,
            path = %req.uri().path(),
            "Role gate denied request"
        );
        return Err(AuthError::Forbidden);
    }

    Ok(next.run(req).await)
}

/// Active account gate middleware
///
/// Must run after [`jwt_auth_middleware`]. Safe methods pass without a lookup.
pub async fn active_account_middleware(
    pool: PgPool,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(auth) = req.extensions().get::<AuthContext>().copied() else {
        return Err(AuthError::MissingCredentials);
    };

    if is_safe_method(req.method()) {
        return Ok(next.run(req).await);
    }

    let active = User::account_active(&pool, auth.user_id).await.map_err(|e| {
        tracing::error!(user_id = %auth.user_id, error = %e, "Account lookup failed");
        AuthError::Unavailable
    })?;

    if !active {
        tracing::warn!(user_id = %auth.user_id, path = %req.uri().path(), "Disabled account denied");
        return Err(AuthError::AccountDisabled);
    }

    Ok(next.run(req).await)
}

fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

type MiddlewareFuture = Pin<Box<dyn Future<Output = Result<Response, AuthError>> + Send>>;

/// Creates a JWT authentication middleware closure
pub fn create_jwt_middleware(
    secret: impl Into<String>,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    let secret = secret.into();
    move |req, next| {
        let secret = secret.clone();
        Box::pin(jwt_auth_middleware(secret, req, next))
    }
}

/// Creates a role gate closure for a fixed set of roles
pub fn create_role_gate(
    allowed: &'static [UserRole],
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| Box::pin(role_gate_middleware(allowed, req, next))
}

/// Creates an active account gate closure over the pool
pub fn create_active_account_gate(
    pool: PgPool,
) -> impl Fn(Request, Next) -> MiddlewareFuture + Clone {
    move |req, next| Box::pin(active_account_middleware(pool.clone(), req, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_context() {
        let user_id = Uuid::new_v4();
        let context = AuthContext::new(user_id, UserRole::Admin);

        assert_eq!(context.user_id, user_id);
        assert!(context.is_admin());
        assert!(!AuthContext::new(user_id, UserRole::Seller).is_admin());
    }

    #[test]
    fn test_auth_error_into_response() {
        let response = AuthError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let response = AuthError::InvalidFormat("test".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AuthError::Forbidden.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());

        let response = AuthError::AccountDisabled.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = AuthError::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_safe_methods_skip_account_lookup() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::PUT));
        assert!(!is_safe_method(&Method::DELETE));
    }
}
