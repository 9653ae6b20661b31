//! Test database setup and management
#![allow(dead_code)]

use rollout::app_config::DatabaseConfig;
use sea_orm::{DatabaseConnection, DbErr};

/// Fresh in-memory SQLite database with the schema applied.
///
/// Each call returns an isolated database, so tests can run in parallel.
pub async fn setup_test_database() -> Result<DatabaseConnection, DbErr> {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        auto_migrate: true,
    };
    let db = rollout::db::connect(&config).await?;
    rollout::db::create_schema(&db).await?;
    Ok(db)
}

/// Count rows in `flag_assignments` for one flag straight from the table.
pub async fn count_assignment_rows(db: &DatabaseConnection, flag_id: i32) -> u64 {
    use rollout::orm::flag_assignments;
    use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

    flag_assignments::Entity::find()
        .filter(flag_assignments::Column::FeatureFlagId.eq(flag_id))
        .count(db)
        .await
        .expect("Failed to count assignments") as u64
}
