//! Durable job store: the single source of truth for job lifecycle state.
//!
//! The [`store::JobStore`] trait is the mutual-exclusion point for the
//! whole pipeline — `try_lease` is the only operation that moves a job out
//! of `Pending`, and `finalize` is a compare-and-set so that the poll loop
//! and the provider callback can race safely.

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify connectivity with a trivial query.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply embedded migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
