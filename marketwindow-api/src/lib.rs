//! # MarketWindow API Server Library
//!
//! HTTP surface of the marketplace: account auth, the public catalogue of
//! verified shops, and the seller, admin and buyer areas.
//!
//! ## Modules
//!
//! - `app`: Application state and router builder
//! - `config`: Configuration management
//! - `error`: Error handling and HTTP response mapping
//! - `middleware`: Response security headers
//! - `routes`: API route handlers

pub mod app;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;
