/// Error handling for the API server
///
/// This module provides a unified error type that maps to HTTP responses.
/// All handlers return `Result<T, ApiError>`; every shared-crate error
/// converts into it with `?`.
///
/// # Example
///
/// ```
/// use marketwindow_api::error::{ApiError, ApiResult};
/// use axum::Json;
/// use serde_json::json;
///
/// async fn handler(found: bool) -> ApiResult<Json<serde_json::Value>> {
///     if !found {
///         return Err(ApiError::NotFound("Shop not found".to_string()));
///     }
///     Ok(Json(json!({ "ok": true })))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use marketwindow_shared::{
    auth::{
        access::AccessError,
        jwt::JwtError,
        middleware::AuthError,
        password::PasswordError,
    },
    ledger::LedgerError,
    otp::{delivery::DeliveryError, OtpError},
    verification::VerificationError,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403) - role or ownership check failed
    Forbidden(String),

    /// Not found (404)
    NotFound(String),

    /// Conflict (409) - e.g., duplicate email, invalid state transition
    Conflict(String),

    /// One-time code has expired (410)
    Expired(String),

    /// One-time code was already used (409)
    AlreadyConsumed(String),

    /// One-time code does not match (400)
    Mismatch(String),

    /// Too many failed code attempts (429)
    TooManyAttempts(String),

    /// Unprocessable entity (422) - validation errors
    ValidationError(Vec<ValidationErrorDetail>),

    /// Internal server error (500)
    InternalError(String),

    /// Service unavailable (503)
    ServiceUnavailable(String),
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "otp_expired")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    /// Single-field validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: field.into(),
            message: message.into(),
        }])
    }

    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Mismatch(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::AlreadyConsumed(_) => StatusCode::CONFLICT,
            ApiError::Expired(_) => StatusCode::GONE,
            ApiError::TooManyAttempts(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Expired(_) => "otp_expired",
            ApiError::AlreadyConsumed(_) => "otp_already_consumed",
            ApiError::Mismatch(_) => "otp_mismatch",
            ApiError::TooManyAttempts(_) => "otp_too_many_attempts",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::InternalError(_) => "internal_error",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
        }
    }

    /// Message safe to show a client; internal details are masked
    pub fn client_message(&self) -> String {
        match self {
            ApiError::ValidationError(_) => "Request validation failed".to_string(),
            ApiError::InternalError(_) => "An internal error occurred".to_string(),
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Expired(msg)
            | ApiError::AlreadyConsumed(msg)
            | ApiError::Mismatch(msg)
            | ApiError::TooManyAttempts(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Expired(msg) => write!(f, "Expired: {}", msg),
            ApiError::AlreadyConsumed(msg) => write!(f, "Already consumed: {}", msg),
            ApiError::Mismatch(msg) => write!(f, "Mismatch: {}", msg),
            ApiError::TooManyAttempts(msg) => write!(f, "Too many attempts: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_code = self.code();
        let message = self.client_message();

        let details = match self {
            ApiError::ValidationError(errors) => Some(errors),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                None
            }
            other => {
                if status.is_server_error() {
                    tracing::warn!(error = %other, "Request failed");
                }
                None
            }
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Convert sqlx errors to API errors
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    return match db_err.constraint() {
                        Some(c) if c.contains("email") => {
                            ApiError::Conflict("Email already exists".to_string())
                        }
                        Some(c) if c.contains("username") => {
                            ApiError::Conflict("Username already exists".to_string())
                        }
                        Some(c) if c.contains("name") => {
                            ApiError::Conflict("Name already exists".to_string())
                        }
                        _ => ApiError::Conflict("Resource already exists".to_string()),
                    };
                }
                if db_err.is_foreign_key_violation() {
                    return ApiError::validation(
                        db_err.constraint().unwrap_or("reference"),
                        "Referenced resource does not exist",
                    );
                }

                ApiError::InternalError(format!("Database error: {}", db_err))
            }
            sqlx::Error::PoolTimedOut => {
                ApiError::ServiceUnavailable("Database is busy, try again".to_string())
            }
            _ => ApiError::InternalError(format!("Database error: {}", err)),
        }
    }
}

/// Convert request validation failures to a 422 with per-field details
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                let field = field.to_string();
                errs.iter().map(move |e| ValidationErrorDetail {
                    field: field.clone(),
                    message: e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("Invalid value ({})", e.code)),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));

        ApiError::ValidationError(details)
    }
}

/// Convert auth errors to API errors
impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => {
                ApiError::Unauthorized("Missing credentials".to_string())
            }
            AuthError::InvalidFormat(msg) => ApiError::BadRequest(msg),
            AuthError::InvalidToken(msg) => ApiError::Unauthorized(msg),
            AuthError::Forbidden => {
                ApiError::Forbidden("You do not have access to this resource".to_string())
            }
            AuthError::AccountDisabled => ApiError::Unauthorized("Account is disabled".to_string()),
            AuthError::Unavailable => {
                ApiError::ServiceUnavailable("Service temporarily unavailable".to_string())
            }
        }
    }
}

/// Convert access gate errors to API errors
impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        ApiError::Forbidden(err.to_string())
    }
}

/// Convert password errors to API errors
impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

/// Convert JWT errors to API errors
impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::InvalidIssuer => {
                ApiError::Unauthorized("Invalid token issuer".to_string())
            }
            JwtError::CreateError(msg) => {
                ApiError::InternalError(format!("Token creation failed: {}", msg))
            }
            _ => ApiError::Unauthorized(format!("Invalid token: {}", err)),
        }
    }
}

/// Convert one-time code errors to API errors
impl From<OtpError> for ApiError {
    fn from(err: OtpError) -> Self {
        let message = err.to_string();
        match err {
            OtpError::NotFound => ApiError::NotFound(message),
            OtpError::Expired => ApiError::Expired(message),
            OtpError::AlreadyConsumed => ApiError::AlreadyConsumed(message),
            OtpError::Mismatch { .. } => ApiError::Mismatch(message),
            OtpError::TooManyAttempts => ApiError::TooManyAttempts(message),
            OtpError::Conflict => ApiError::Conflict(message),
            OtpError::InvalidConfig(msg) => ApiError::InternalError(msg),
            OtpError::Database(e) => e.into(),
        }
    }
}

/// Convert delivery errors to API errors
impl From<DeliveryError> for ApiError {
    fn from(err: DeliveryError) -> Self {
        let message = err.to_string();
        match err {
            DeliveryError::NoDestination => ApiError::Conflict(message),
            DeliveryError::Failed(msg) => {
                tracing::warn!(error = %msg, "Code delivery failed");
                ApiError::ServiceUnavailable("Could not deliver the code, try again".to_string())
            }
        }
    }
}

/// Convert stock ledger errors to API errors
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::ProductNotFound | LedgerError::EntryNotFound => ApiError::NotFound(message),
            LedgerError::NoChange => ApiError::validation("change", message),
            LedgerError::InvalidQuantity(msg) => ApiError::validation("quantity", msg),
            LedgerError::AlreadyReversed
            | LedgerError::CannotUndoReversal
            | LedgerError::InsufficientStock { .. } => ApiError::Conflict(message),
            LedgerError::Database(e) => e.into(),
        }
    }
}

/// Convert verification errors to API errors
impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        let message = err.to_string();
        match err {
            VerificationError::ShopNotFound => ApiError::NotFound(message),
            VerificationError::ShopAlreadyExists | VerificationError::InvalidTransition { .. } => {
                ApiError::Conflict(message)
            }
            VerificationError::NoDestination => ApiError::Conflict(message),
            VerificationError::Validation(msg) => ApiError::BadRequest(msg),
            VerificationError::Otp(e) => e.into(),
            VerificationError::Delivery(e) => e.into(),
            VerificationError::Database(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[test]
    fn test_error_display() {
        let err = ApiError::BadRequest("Invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: Invalid input");

        let err = ApiError::NotFound("Shop not found".to_string());
        assert_eq!(err.to_string(), "Not found: Shop not found");
    }

    #[test]
    fn test_otp_errors_map_to_distinct_statuses() {
        let cases = [
            (OtpError::Expired, StatusCode::GONE, "otp_expired"),
            (OtpError::AlreadyConsumed, StatusCode::CONFLICT, "otp_already_consumed"),
            (
                OtpError::Mismatch { remaining_attempts: 2 },
                StatusCode::BAD_REQUEST,
                "otp_mismatch",
            ),
            (OtpError::TooManyAttempts, StatusCode::TOO_MANY_REQUESTS, "otp_too_many_attempts"),
            (OtpError::NotFound, StatusCode::NOT_FOUND, "not_found"),
        ];

        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn test_mismatch_message_reports_remaining_attempts() {
        let api: ApiError = OtpError::Mismatch { remaining_attempts: 3 }.into();
        assert!(api.to_string().contains("3 attempts left"));
    }

    #[test]
    fn test_verification_otp_errors_pass_through() {
        let api: ApiError = VerificationError::Otp(OtpError::Expired).into();
        assert_eq!(api.status(), StatusCode::GONE);

        let api: ApiError = VerificationError::InvalidTransition {
            from: "verified",
            to: "otp_sent",
        }
        .into();
        assert_eq!(api.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_ledger_errors() {
        let api: ApiError = LedgerError::ProductNotFound.into();
        assert_eq!(api.status(), StatusCode::NOT_FOUND);

        let api: ApiError = LedgerError::NoChange.into();
        assert_eq!(api.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let api: ApiError = LedgerError::InsufficientStock { available: 1, required: 5 }.into();
        assert_eq!(api.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_access_error_is_forbidden() {
        let api: ApiError = AccessError::Forbidden { operation: "update_stock" }.into();
        assert_eq!(api.status(), StatusCode::FORBIDDEN);
        assert!(api.to_string().contains("update_stock"));
    }

    #[test]
    fn test_internal_error_is_masked() {
        let response = ApiError::InternalError("connection reset by peer".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[derive(Validate)]
    struct Sample {
        #[validate(email(message = "Invalid email format"))]
        email: String,
        #[validate(length(min = 3))]
        username: String,
    }

    #[test]
    fn test_validator_errors_become_details() {
        let sample = Sample {
            email: "not-an-email".to_string(),
            username: "ab".to_string(),
        };
        let api: ApiError = sample.validate().unwrap_err().into();

        match api {
            ApiError::ValidationError(details) => {
                assert_eq!(details.len(), 2);
                assert_eq!(details[0].field, "email");
                assert_eq!(details[0].message, "Invalid email format");
                assert_eq!(details[1].field, "username");
                assert!(details[1].message.contains("length"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
