//! SeaORM-backed flag store.

use super::{AssignmentCounts, FeatureFlag, FlagStore, NewFlag, StoreError, StoredAssignment};
use crate::orm::flag_assignments::Variant;
use crate::orm::{feature_flags, flag_assignments};
use crate::rollout::RolloutPercentage;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    entity::*, query::*, sea_query::Expr, ActiveValue::Set, DatabaseConnection, FromQueryResult,
    TransactionTrait,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Grouped row of `SELECT feature_flag_id, variant, COUNT(id)`.
#[derive(Debug, FromQueryResult)]
struct VariantCountRow {
    feature_flag_id: i32,
    variant: String,
    total: i64,
}

#[derive(Debug, Clone)]
pub struct DbStore {
    db: DatabaseConnection,
}

impl DbStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    async fn update_flag(
        &self,
        id: i32,
        column: feature_flags::Column,
        value: sea_orm::Value,
    ) -> Result<FeatureFlag, StoreError> {
        let result = feature_flags::Entity::update_many()
            .col_expr(column, Expr::value(value))
            .col_expr(
                feature_flags::Column::UpdatedAt,
                Expr::value(Utc::now().naive_utc()),
            )
            .filter(feature_flags::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound(id));
        }

        self.find_flag(id).await?.ok_or(StoreError::NotFound(id))
    }

    async fn group_counts(
        &self,
        flag_id: Option<i32>,
    ) -> Result<HashMap<i32, AssignmentCounts>, StoreError> {
        let mut query = flag_assignments::Entity::find()
            .select_only()
            .column(flag_assignments::Column::FeatureFlagId)
            .column(flag_assignments::Column::Variant)
            .column_as(Expr::col(flag_assignments::Column::Id).count(), "total")
            .group_by(flag_assignments::Column::FeatureFlagId)
            .group_by(flag_assignments::Column::Variant);

        if let Some(flag_id) = flag_id {
            query = query.filter(flag_assignments::Column::FeatureFlagId.eq(flag_id));
        }

        let rows = query.into_model::<VariantCountRow>().all(&self.db).await?;

        let mut counts: HashMap<i32, AssignmentCounts> = HashMap::new();
        for row in rows {
            match Variant::from_db_str(&row.variant) {
                Some(variant) => counts
                    .entry(row.feature_flag_id)
                    .or_default()
                    .record(variant, row.total.max(0) as u64),
                None => log::warn!(
                    "Ignoring {} assignments with unknown variant '{}' on flag {}",
                    row.total,
                    row.variant,
                    row.feature_flag_id
                ),
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl FlagStore for DbStore {
    async fn find_flag(&self, id: i32) -> Result<Option<FeatureFlag>, StoreError> {
        Ok(feature_flags::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(FeatureFlag::from))
    }

    async fn find_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
        Ok(feature_flags::Entity::find()
            .filter(feature_flags::Column::Key.eq(key))
            .one(&self.db)
            .await?
            .map(FeatureFlag::from))
    }

    async fn list_flags(&self) -> Result<Vec<FeatureFlag>, StoreError> {
        Ok(feature_flags::Entity::find()
            .order_by_asc(feature_flags::Column::Key)
            .all(&self.db)
            .await?
            .into_iter()
            .map(FeatureFlag::from)
            .collect())
    }

    async fn create_flag(&self, flag: NewFlag) -> Result<FeatureFlag, StoreError> {
        if self.find_flag_by_key(&flag.key).await?.is_some() {
            return Err(StoreError::DuplicateKey(flag.key));
        }

        let now = Utc::now().naive_utc();
        let model = feature_flags::ActiveModel {
            key: Set(flag.key.clone()),
            description: Set(flag.description),
            enabled: Set(flag.enabled),
            rollout_percentage: Set(flag.rollout_percentage.into()),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(created) => Ok(created.into()),
            // Lost a race against another create with the same key
            Err(e) => match self.find_flag_by_key(&flag.key).await? {
                Some(_) => Err(StoreError::DuplicateKey(flag.key)),
                None => Err(e.into()),
            },
        }
    }

    async fn set_enabled(&self, id: i32, enabled: bool) -> Result<FeatureFlag, StoreError> {
        self.update_flag(id, feature_flags::Column::Enabled, enabled.into())
            .await
    }

    async fn set_rollout(
        &self,
        id: i32,
        percentage: RolloutPercentage,
    ) -> Result<FeatureFlag, StoreError> {
        let value: i32 = percentage.into();
        self.update_flag(id, feature_flags::Column::RolloutPercentage, value.into())
            .await
    }

    async fn delete_flag(&self, id: i32) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        // The foreign key cascades as well; deleting explicitly keeps backends
        // without enforced foreign keys consistent.
        flag_assignments::Entity::delete_many()
            .filter(flag_assignments::Column::FeatureFlagId.eq(id))
            .exec(&txn)
            .await?;

        let result = feature_flags::Entity::delete_many()
            .filter(feature_flags::Column::Id.eq(id))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(StoreError::NotFound(id));
        }

        txn.commit().await?;
        Ok(())
    }

    async fn find_assignment(
        &self,
        flag_id: i32,
        user_id: Uuid,
    ) -> Result<Option<Variant>, StoreError> {
        Ok(flag_assignments::Entity::find()
            .filter(flag_assignments::Column::FeatureFlagId.eq(flag_id))
            .filter(flag_assignments::Column::UserId.eq(user_id.to_string()))
            .one(&self.db)
            .await?
            .map(|row| row.variant))
    }

    async fn insert_assignment(
        &self,
        flag_id: i32,
        user_id: Uuid,
        variant: Variant,
    ) -> Result<StoredAssignment, StoreError> {
        let model = flag_assignments::ActiveModel {
            feature_flag_id: Set(flag_id),
            user_id: Set(user_id.to_string()),
            variant: Set(variant),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        };

        match model.insert(&self.db).await {
            Ok(row) => Ok(StoredAssignment {
                variant: row.variant,
                inserted: true,
            }),
            // Unique (feature_flag_id, user_id) violation: read the winner
            Err(e) => match self.find_assignment(flag_id, user_id).await? {
                Some(existing) => {
                    log::debug!(
                        "Assignment race on flag {} for {}; keeping stored {}",
                        flag_id,
                        user_id,
                        existing
                    );
                    Ok(StoredAssignment {
                        variant: existing,
                        inserted: false,
                    })
                }
                None => Err(e.into()),
            },
        }
    }

    async fn delete_assignments(&self, flag_id: i32) -> Result<u64, StoreError> {
        let result = flag_assignments::Entity::delete_many()
            .filter(flag_assignments::Column::FeatureFlagId.eq(flag_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    async fn assignment_counts(&self) -> Result<HashMap<i32, AssignmentCounts>, StoreError> {
        self.group_counts(None).await
    }

    async fn assignment_counts_for(&self, flag_id: i32) -> Result<AssignmentCounts, StoreError> {
        Ok(self
            .group_counts(Some(flag_id))
            .await?
            .remove(&flag_id)
            .unwrap_or_default())
    }
}
