use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tracing::info;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://carbon_scores.db?mode=rwc";

/// In-memory SQLite on a single pooled connection, so every query sees the
/// same database.
pub async fn connect_to_memory_database() -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    Database::connect(options).await
}

/// Connect to `database_url` and bring the schema up to date.
pub async fn connect_and_migrate(database_url: &str) -> anyhow::Result<DatabaseConnection> {
    let db = Database::connect(database_url)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;

    Migrator::up(&db, None)
        .await
        .context("running migrations")?;
    info!("Database ready at {}", database_url);

    Ok(db)
}
