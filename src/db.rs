//! Database connection and schema bootstrap.

use crate::app_config::DatabaseConfig;
use crate::orm::{feature_flags, flag_assignments};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema, Statement,
};

/// Name of the unique `(feature_flag_id, user_id)` index.
pub const ASSIGNMENT_UNIQUE_INDEX: &str = "idx_flag_assignments_flag_user";

/// Open a connection pool.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    // Every connection to an in-memory SQLite database is its own database.
    let max_connections = if config.url.starts_with("sqlite::memory:") {
        1
    } else {
        config.max_connections.max(1)
    };
    options.max_connections(max_connections);

    let db = Database::connect(options).await?;
    log::info!("Connected to database ({:?})", db.get_database_backend());
    Ok(db)
}

/// Create both tables and the assignment uniqueness index from the entity
/// definitions. Every step is `IF NOT EXISTS`, so this also repairs a
/// database whose tables exist without the index.
/// Postgres deployments may apply `migrations/` instead.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    db.execute(backend.build(
        schema
            .create_table_from_entity(feature_flags::Entity)
            .if_not_exists(),
    ))
    .await?;

    db.execute(backend.build(
        schema
            .create_table_from_entity(flag_assignments::Entity)
            .if_not_exists(),
    ))
    .await?;

    // sea-query has no IF NOT EXISTS for indexes; SQLite and Postgres both accept it.
    db.execute(Statement::from_string(
        backend,
        format!(
            r#"CREATE UNIQUE INDEX IF NOT EXISTS "{}" ON "flag_assignments" ("feature_flag_id", "user_id")"#,
            ASSIGNMENT_UNIQUE_INDEX
        ),
    ))
    .await?;

    log::info!("Database schema ready");
    Ok(())
}
