/// Database migration runner
///
/// Migrations live in the `migrations/` directory at the workspace root and
/// are embedded into the binary at compile time. Each migration has an
/// `{timestamp}_{name}.up.sql` file and a matching `.down.sql` rollback.
///
/// Besides tables, the migrations carry the storage-level guarantees the
/// business rules lean on:
///
/// - `otps_one_active`: one live code per (subject, purpose)
/// - `shop_verifications_one_open`: one open verification cycle per shop
/// - `stock_updates_reverses_once`: an entry is undone at most once
/// - `stock_updates_append_only`: trigger rejecting UPDATE/DELETE on the ledger
///
/// # Example
///
/// ```no_run
/// use marketwindow_shared::db::pool::{create_pool, DatabaseConfig};
/// use marketwindow_shared::db::migrations::{run_migrations, get_migration_status};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool(DatabaseConfig::from_url(std::env::var("DATABASE_URL")?, 5)).await?;
///
///     run_migrations(&pool).await?;
///
///     let status = get_migration_status(&pool).await?;
///     assert!(status.is_up_to_date);
///     Ok(())
/// }
/// ```

use sqlx::{migrate::{MigrateDatabase, Migrator}, postgres::PgPool, Postgres};
use tracing::{debug, info, warn};

/// Migrations embedded from the workspace `migrations/` directory
pub static MIGRATOR: Migrator = sqlx::migrate!("../migrations");

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Number of migrations that have been applied
    pub applied_migrations: usize,

    /// Number of migrations embedded in this build
    pub known_migrations: usize,

    /// Latest applied migration version (timestamp)
    pub latest_version: Option<i64>,

    /// Whether every embedded migration has been applied
    pub is_up_to_date: bool,
}

/// Number of forward migrations embedded in this build
pub fn known_migrations() -> usize {
    MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .count()
}

/// Runs all pending database migrations
///
/// sqlx takes an advisory lock while migrating, so concurrent callers (test
/// binaries, several server replicas) apply each migration once.
///
/// # Errors
///
/// Returns an error if a migration fails or a previously applied migration
/// has been modified.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!(known = known_migrations(), "Starting database migrations");

    match MIGRATOR.run(pool).await {
        Ok(()) => {
            info!("All database migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Migration failed");
            Err(e)
        }
    }
}

/// Gets the current migration status
///
/// # Errors
///
/// Returns an error if the migrations table cannot be queried.
pub async fn get_migration_status(pool: &PgPool) -> Result<MigrationStatus, sqlx::Error> {
    debug!("Checking migration status");

    let known = known_migrations();

    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (
            SELECT FROM information_schema.tables
            WHERE table_schema = 'public'
            AND table_name = '_sqlx_migrations'
        )",
    )
    .fetch_one(pool)
    .await?;

    if !table_exists {
        return Ok(MigrationStatus {
            applied_migrations: 0,
            known_migrations: known,
            latest_version: None,
            is_up_to_date: known == 0,
        });
    }

    let (count, latest_version): (i64, Option<i64>) = sqlx::query_as(
        "SELECT COUNT(*), MAX(version)
         FROM _sqlx_migrations
         WHERE success = true",
    )
    .fetch_one(pool)
    .await?;

    let applied = count as usize;

    debug!(
        applied_migrations = applied,
        known_migrations = known,
        latest_version = ?latest_version,
        "Migration status retrieved"
    );

    Ok(MigrationStatus {
        applied_migrations: applied,
        known_migrations: known,
        latest_version,
        is_up_to_date: applied >= known,
    })
}

/// Creates the database if it doesn't exist (development and tests)
///
/// # Errors
///
/// Returns an error if the server is unreachable or the role may not create
/// databases.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), sqlx::Error> {
    if !Postgres::database_exists(database_url).await? {
        info!("Database does not exist, creating it");
        Postgres::create_database(database_url).await?;
    } else {
        debug!("Database already exists");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_migrations_present() {
        assert_eq!(known_migrations(), 5);
    }

    #[test]
    fn test_embedded_migrations_are_reversible() {
        let downs = MIGRATOR
            .iter()
            .filter(|m| m.migration_type.is_down_migration())
            .count();
        assert_eq!(downs, known_migrations());
    }
}
