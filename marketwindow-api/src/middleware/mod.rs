/// Middleware modules for the API server
///
/// Authentication and role gates live in
/// `marketwindow_shared::auth::middleware`; this module holds the
/// HTTP-only concerns.
///
/// - `security`: Security response headers

pub mod security;
