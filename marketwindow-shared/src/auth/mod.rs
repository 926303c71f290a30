/// Authentication and authorization
///
/// # Modules
///
/// - [`password`]: Argon2id password hashing and strength rules
/// - [`jwt`]: JWT access/refresh tokens carrying the user's role
/// - [`middleware`]: Axum layers for JWT authentication and route role gates
/// - [`access`]: Per-operation role and ownership checks
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::auth::jwt::{create_token, Claims, TokenType};
/// use marketwindow_shared::auth::password::{hash_password, verify_password};
/// use marketwindow_shared::models::user::UserRole;
/// use uuid::Uuid;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("market-day-2024")?;
/// assert!(verify_password("market-day-2024", &hash)?);
///
/// let claims = Claims::new(Uuid::new_v4(), UserRole::Buyer, TokenType::Access);
/// let token = create_token(&claims, "secret-key")?;
/// # Ok(())
/// # }
/// ```

pub mod access;
pub mod jwt;
pub mod middleware;
pub mod password;
