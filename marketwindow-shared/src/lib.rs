//! # MarketWindow Shared Library
//!
//! This crate contains the data layer and business rules shared by the
//! MarketWindow API server: shops, products, the stock ledger, one-time codes
//! and shop verification.
//!
//! ## Module Organization
//!
//! - `db`: Connection pool and migrations
//! - `models`: Database models and data structures
//! - `auth`: Authentication and the role-scoped access gate
//! - `otp`: One-time code issuing, validation and delivery
//! - `ledger`: Append-only stock ledger with the product quantity projection
//! - `verification`: Shop verification state machine

pub mod auth;
pub mod db;
pub mod ledger;
pub mod models;
pub mod otp;
pub mod verification;

/// Current version of the MarketWindow shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns true when a sqlx error is a unique constraint violation
///
/// Used to turn races that lose against a partial unique index into the
/// domain error the caller would have seen had it run second.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_row_not_found_is_not_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
