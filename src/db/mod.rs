pub mod postgres;
pub mod tenant;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::repository::RepositoryError;

pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run the migrations embedded from ./migrations/
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Unique violations become `Conflict`; everything else is a storage error.
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.constraint().unwrap_or("unique constraint").to_string())
        }
        _ => RepositoryError::Storage(e.to_string()),
    }
}
