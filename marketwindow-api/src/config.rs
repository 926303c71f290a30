/// Configuration management for the API server
///
/// Settings come from the process environment (and a `.env` file when
/// present), layered over defaults with the `config` crate, then validated
/// into a typed [`Config`].
///
/// # Environment Variables
///
/// - `SECRET_KEY`: JWT signing and OTP HMAC key (required, 32+ chars)
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 10)
/// - `API_HOST` / `API_PORT`: Bind address (default: 0.0.0.0:8080)
/// - `APP_ENV`: `development` or `production` (default: development)
/// - `CORS_ORIGINS`: Comma separated origins, `*` for any (default: *)
/// - `OTP_TTL_MINUTES`: Code lifetime (default: 10)
/// - `OTP_MAX_ATTEMPTS`: Failed attempts before a code locks (default: 5)
/// - `LOW_STOCK_THRESHOLD`: Default low-stock threshold (default: 10)
/// - `RUN_MIGRATIONS`: Apply migrations at startup (default: true)
/// - `ADMIN_EMAIL` / `ADMIN_USERNAME` / `ADMIN_PASSWORD`: Bootstrap admin
///
/// # Example
///
/// ```no_run
/// use marketwindow_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use config::{ConfigBuilder, Environment as EnvSource};
use serde::Deserialize;
use std::fmt;

/// Minimum length of `SECRET_KEY`
pub const MIN_SECRET_LENGTH: usize = 32;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    Development,
    Production,
}

/// Complete application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub otp: OtpConfig,
    pub inventory: InventoryConfig,

    /// Admin account created at startup if no admin exists
    pub admin: Option<AdminBootstrap>,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub env: AppEnv,

    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
}

impl ApiConfig {
    pub fn is_production(&self) -> bool {
        self.env == AppEnv::Production
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

#[derive(Clone)]
pub struct AuthConfig {
    /// Signs JWTs and keys OTP hashes
    ///
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig").field("secret", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl_minutes: i64,
    pub max_attempts: i32,
}

#[derive(Debug, Clone)]
pub struct InventoryConfig {
    pub low_stock_threshold: i64,
}

#[derive(Clone)]
pub struct AdminBootstrap {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Flat settings as read from the environment
#[derive(Debug, Deserialize)]
struct RawSettings {
    secret_key: Option<String>,
    database_url: Option<String>,
    database_max_connections: u32,
    api_host: String,
    api_port: u16,
    app_env: AppEnv,
    cors_origins: String,
    otp_ttl_minutes: i64,
    otp_max_attempts: i32,
    low_stock_threshold: i64,
    run_migrations: bool,
    admin_email: Option<String>,
    admin_username: Option<String>,
    admin_password: Option<String>,
}

fn with_defaults<St: config::builder::BuilderState>(
    builder: ConfigBuilder<St>,
) -> Result<ConfigBuilder<St>, config::ConfigError> {
    builder
        .set_default("database_max_connections", 10)?
        .set_default("api_host", "0.0.0.0")?
        .set_default("api_port", 8080)?
        .set_default("app_env", "development")?
        .set_default("cors_origins", "*")?
        .set_default("otp_ttl_minutes", 10)?
        .set_default("otp_max_attempts", 5)?
        .set_default("low_stock_threshold", 10)?
        .set_default("run_migrations", true)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or any value is
    /// out of range.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let builder = with_defaults(config::Config::builder())?
            .add_source(EnvSource::default().try_parsing(true));

        Self::from_builder(builder)
    }

    /// Builds configuration from an explicit source (used by tests)
    pub fn from_builder(
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> anyhow::Result<Self> {
        let raw: RawSettings = with_defaults(builder)?.build()?.try_deserialize()?;
        Self::validate(raw)
    }

    fn validate(raw: RawSettings) -> anyhow::Result<Self> {
        let secret = non_blank(raw.secret_key)
            .ok_or_else(|| anyhow::anyhow!("SECRET_KEY environment variable is required"))?;
        if secret.len() < MIN_SECRET_LENGTH {
            anyhow::bail!("SECRET_KEY must be at least {} characters long", MIN_SECRET_LENGTH);
        }

        let url = non_blank(raw.database_url)
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL environment variable is required"))?;

        if raw.database_max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        if raw.otp_ttl_minutes <= 0 || raw.otp_ttl_minutes > 24 * 60 {
            anyhow::bail!("OTP_TTL_MINUTES must be between 1 and 1440");
        }
        if raw.otp_max_attempts <= 0 {
            anyhow::bail!("OTP_MAX_ATTEMPTS must be at least 1");
        }
        if raw.low_stock_threshold < 0 {
            anyhow::bail!("LOW_STOCK_THRESHOLD cannot be negative");
        }

        let cors_origins: Vec<String> = raw
            .cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();

        let admin = match (
            non_blank(raw.admin_email),
            non_blank(raw.admin_username),
            non_blank(raw.admin_password),
        ) {
            (Some(email), Some(username), Some(password)) => Some(AdminBootstrap {
                email,
                username,
                password,
            }),
            (None, None, None) => None,
            _ => anyhow::bail!(
                "ADMIN_EMAIL, ADMIN_USERNAME and ADMIN_PASSWORD must be set together"
            ),
        };

        Ok(Self {
            api: ApiConfig {
                host: raw.api_host,
                port: raw.api_port,
                env: raw.app_env,
                cors_origins,
            },
            database: DatabaseConfig {
                url,
                max_connections: raw.database_max_connections,
                run_migrations: raw.run_migrations,
            },
            auth: AuthConfig { secret },
            otp: OtpConfig {
                ttl_minutes: raw.otp_ttl_minutes,
                max_attempts: raw.otp_max_attempts,
            },
            inventory: InventoryConfig {
                low_stock_threshold: raw.low_stock_threshold,
            },
            admin,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}
