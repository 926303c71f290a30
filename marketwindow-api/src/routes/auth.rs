/// Authentication endpoints
///
/// # Endpoints
///
/// - `POST /v1/auth/register` - Register a buyer or seller account
/// - `POST /v1/auth/login` - Login and get tokens
/// - `POST /v1/auth/refresh` - Exchange a refresh token for a new pair
/// - `GET  /v1/auth/me` - Current account
/// - `POST /v1/auth/password-reset/request` - Email a reset code
/// - `POST /v1/auth/password-reset/confirm` - Set a new password with the code

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    routes::validated,
};
use axum::{extract::State, http::StatusCode, Extension, Json};
use marketwindow_shared::{
    auth::{
        jwt::{self, TokenPair},
        middleware::AuthContext,
        password,
    },
    models::{
        otp::OtpPurpose,
        user::{CreateUser, User, UserRole},
    },
    otp::{code, delivery::OtpMessage, OtpError},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 3, max = 50, message = "Username must be 3 to 50 characters"))]
    pub username: String,

    /// Checked with the password strength rules after deserialization
    pub password: String,

    /// `buyer` (default) or `seller`
    #[serde(default)]
    pub role: Option<UserRole>,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Refresh token request
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response for register, login and refresh
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,

    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirm {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    pub code: String,

    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

fn check_password(field: &str, value: &str) -> ApiResult<()> {
    password::validate_password_strength(value).map_err(|e| ApiError::validation(field, e))
}

/// Register a new account
///
/// ```text
/// POST /v1/auth/register
///
/// { "email": "stall@example.com", "username": "fresh_fruit", "password": "market-day-2024", "role": "seller" }
/// ```
///
/// # Errors
///
/// - `422 Unprocessable Entity`: Validation failed, or role `admin` requested
/// - `409 Conflict`: Email or username already taken
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let req = validated(req)?;
    check_password("password", &req.password)?;

    let role = req.role.unwrap_or(UserRole::Buyer);
    if !role.is_self_registrable() {
        return Err(ApiError::validation("role", "Role must be buyer or seller"));
    }

    let password_hash = password::hash_password(&req.password)?;

    let user = User::create(
        &state.db,
        CreateUser {
            email: req.email,
            username: req.username,
            password_hash,
            role,
        },
    )
    .await?;

    let tokens = jwt::issue_token_pair(user.id, user.role, state.jwt_secret())?;

    tracing::info!(user_id = %user.id, role = %user.role, "User registered");

    Ok((StatusCode::CREATED, Json(AuthResponse { user, tokens })))
}

/// Login
///
/// # Errors
///
/// - `401 Unauthorized`: Unknown email, wrong password, or disabled account
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let req = validated(req)?;

    let Some(user) = User::find_by_email(&state.db, &req.email).await? else {
        password::verify_dummy(&req.password);
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };

    if !password::verify_password(&req.password, &user.password_hash)? {
        tracing::info!(user_id = %user.id, "Login failed: wrong password");
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    if !user.is_active {
        return Err(ApiError::Unauthorized("Account is disabled".to_string()));
    }

    User::update_last_login(&state.db, user.id).await?;
    let tokens = jwt::issue_token_pair(user.id, user.role, state.jwt_secret())?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok(Json(AuthResponse { user, tokens }))
}

/// Exchanges a refresh token for a new token pair
///
/// The account is re-read so a role change or deactivation takes effect at
/// the next refresh.
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let claims = jwt::validate_refresh_token(&req.refresh_token, state.jwt_secret())?;

    let user = User::find_by_id(&state.db, claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::Unauthorized("Account is no longer active".to_string()))?;

    let tokens = jwt::issue_token_pair(user.id, user.role, state.jwt_secret())?;

    Ok(Json(AuthResponse { user, tokens }))
}

/// Current account
pub async fn me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> ApiResult<Json<User>> {
    let user = User::find_by_id(&state.db, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Account not found".to_string()))?;

    Ok(Json(user))
}

/// Sends a password reset code to the account email
///
/// Always answers `202 Accepted` with the same body, whether or not the
/// account exists.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> ApiResult<(StatusCode, Json<MessageResponse>)> {
    let req = validated(req)?;
    let accepted = (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the account exists, a reset code has been sent",
        }),
    );

    let Some(user) = User::find_by_email(&state.db, &req.email)
        .await?
        .filter(|u| u.is_active)
    else {
        return Ok(accepted);
    };

    let mut tx = state.db.begin().await?;
    let issued = state
        .otp
        .issue(&mut tx, user.id, OtpPurpose::PasswordReset, Some(&user.email))
        .await?;

    let delivered = state
        .delivery
        .deliver(&OtpMessage {
            subject_id: user.id,
            purpose: OtpPurpose::PasswordReset,
            destination: user.email.clone(),
            code: issued.code().to_string(),
            expires_in_minutes: state.otp.ttl_minutes(),
        })
        .await;

    match delivered {
        Ok(()) => {
            tx.commit().await?;
            tracing::info!(user_id = %user.id, "Password reset code sent");
        }
        Err(e) => {
            // Dropping the transaction discards the undelivered code
            tracing::warn!(user_id = %user.id, error = %e, "Password reset code delivery failed");
        }
    }

    Ok(accepted)
}

/// Sets a new password using a reset code
///
/// # Errors
///
/// - `404 Not Found`: No code was issued for this email
/// - `400` / `410` / `409` / `429`: Code mismatch, expired, used, or locked
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetConfirm>,
) -> ApiResult<Json<MessageResponse>> {
    let req = validated(req)?;
    if !code::is_well_formed(req.code.trim()) {
        return Err(ApiError::validation("code", "Code must be 6 digits"));
    }
    check_password("new_password", &req.new_password)?;

    let user = User::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::from(OtpError::NotFound))?;

    let password_hash = password::hash_password(&req.new_password)?;

    let mut tx = state.db.begin().await?;
    match state
        .otp
        .validate(&mut tx, user.id, OtpPurpose::PasswordReset, &req.code)
        .await
    {
        Ok(_) => {}
        Err(OtpError::Database(e)) => return Err(e.into()),
        Err(e) => {
            // Keep the attempt count and expiry bookkeeping
            tx.commit().await?;
            return Err(e.into());
        }
    }

    User::set_password_hash(&mut tx, user.id, &password_hash).await?;
    tx.commit().await?;

    tracing::info!(user_id = %user.id, "Password reset completed");

    Ok(Json(MessageResponse {
        message: "Password has been reset",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_request_validation() {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "email": "not-an-email",
            "username": "ab",
            "password": "market-day-2024"
        }))
        .unwrap();

        let err = req.validate().unwrap_err();
        let fields = err.field_errors();
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("username"));
        assert!(req.role.is_none());
    }

    #[test]
    fn test_register_request_parses_role() {
        let req: RegisterRequest = serde_json::from_value(serde_json::json!({
            "email": "stall@example.com",
            "username": "fresh_fruit",
            "password": "market-day-2024",
            "role": "seller"
        }))
        .unwrap();

        assert!(req.validate().is_ok());
        assert_eq!(req.role, Some(UserRole::Seller));
    }

    #[test]
    fn test_weak_password_is_a_field_error() {
        match check_password("new_password", "short") {
            Err(ApiError::ValidationError(details)) => {
                assert_eq!(details[0].field, "new_password");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
