/// API route handlers
///
/// - `health`: Health check endpoint
/// - `auth`: Registration, login, token refresh, password reset
/// - `catalogue`: Public browsing of verified shops and their products
/// - `seller`: Shop, verification, product and stock management
/// - `admin`: Verification review, moderation, categories, audits
/// - `buyer`: Following shops

pub mod admin;
pub mod auth;
pub mod buyer;
pub mod catalogue;
pub mod health;
pub mod seller;

use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Default page size for list endpoints
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Largest page size a client may request
pub const MAX_PAGE_SIZE: i64 = 100;

/// `?limit=&offset=` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// A page of results
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub limit: i64,
    pub offset: i64,

    /// Present when the listing can count its full result set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<i64>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: &Pagination) -> Self {
        Self {
            items,
            limit: pagination.limit(),
            offset: pagination.offset(),
            total: None,
        }
    }

    pub fn with_total(mut self, total: i64) -> Self {
        self.total = Some(total);
        self
    }
}

/// Runs `validator` rules on a request body
pub(crate) fn validated<T: Validate>(req: T) -> ApiResult<T> {
    req.validate()?;
    Ok(req)
}

/// Trims an optional text field, treating blank as absent
pub(crate) fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub(crate) fn not_found(what: &str) -> ApiError {
    ApiError::NotFound(format!("{} not found", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamps() {
        let p = Pagination::default();
        assert_eq!(p.limit(), DEFAULT_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let p = Pagination { limit: Some(10_000), offset: Some(-4) };
        assert_eq!(p.limit(), MAX_PAGE_SIZE);
        assert_eq!(p.offset(), 0);

        let p = Pagination { limit: Some(0), offset: Some(40) };
        assert_eq!(p.limit(), 1);
        assert_eq!(p.offset(), 40);
    }

    #[test]
    fn test_trimmed() {
        assert_eq!(trimmed(Some("  north  ".to_string())), Some("north".to_string()));
        assert_eq!(trimmed(Some("   ".to_string())), None);
        assert_eq!(trimmed(None), None);
    }

    #[test]
    fn test_page_serializes_total_only_when_known() {
        let page = Page::new(vec![1, 2, 3], &Pagination::default());
        let json = serde_json::to_value(&page).unwrap();
        assert!(json.get("total").is_none());

        let json = serde_json::to_value(page.with_total(3)).unwrap();
        assert_eq!(json["total"], 3);
        assert_eq!(json["items"].as_array().unwrap().len(), 3);
    }
}
