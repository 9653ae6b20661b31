//! Operator-facing flag management
//!
//! None of these operations touch existing assignments, with two exceptions:
//! `reset_assignments` (deletes them all) and `delete_flag` (cascades). Both
//! clear the shared assignment cache.

use crate::cache::AssignmentCache;
use crate::error::ApiError;
use crate::rollout::RolloutPercentage;
use crate::store::{AssignmentCounts, FeatureFlag, FlagStore, NewFlag};
use serde::Serialize;
use std::sync::Arc;

/// A flag together with its live assignment counts.
#[derive(Debug, Clone, Serialize)]
pub struct FlagOverview {
    #[serde(flatten)]
    pub flag: FeatureFlag,
    pub assignments: AssignmentCounts,
}

pub struct FlagAdmin {
    store: Arc<dyn FlagStore>,
    cache: AssignmentCache,
}

impl FlagAdmin {
    pub fn new(store: Arc<dyn FlagStore>, cache: AssignmentCache) -> Self {
        Self { store, cache }
    }

    /// All flags ordered by key, with counts aggregated at read time.
    pub async fn list_flags(&self) -> Result<Vec<FlagOverview>, ApiError> {
        let flags = self.store.list_flags().await?;
        let mut counts = self.store.assignment_counts().await?;

        Ok(flags
            .into_iter()
            .map(|flag| FlagOverview {
                assignments: counts.remove(&flag.id).unwrap_or_default(),
                flag,
            })
            .collect())
    }

    pub async fn get_flag(&self, id: i32) -> Result<FlagOverview, ApiError> {
        let flag = self.require_flag(id).await?;
        let assignments = self.store.assignment_counts_for(id).await?;
        Ok(FlagOverview { flag, assignments })
    }

    pub async fn create_flag(&self, flag: NewFlag) -> Result<FeatureFlag, ApiError> {
        let created = self.store.create_flag(flag).await?;
        log::info!(
            "Feature flag '{}' created (enabled: {}, rollout: {})",
            created.key,
            created.enabled,
            created.rollout_percentage
        );
        Ok(created)
    }

    /// Flip `enabled`. Disabling keeps assignment history intact.
    pub async fn toggle_enabled(&self, id: i32) -> Result<FeatureFlag, ApiError> {
        let flag = self.require_flag(id).await?;
        self.set_enabled(id, !flag.enabled).await
    }

    pub async fn set_enabled(&self, id: i32, enabled: bool) -> Result<FeatureFlag, ApiError> {
        let flag = self.store.set_enabled(id, enabled).await?;
        log::info!("Feature flag '{}' set to {}", flag.key, enabled);
        Ok(flag)
    }

    /// Store a new rollout percentage, clamped into `[0, 100]`. Only users
    /// evaluated for the first time from now on see the new value.
    pub async fn update_percentage(&self, id: i32, percentage: i64) -> Result<FeatureFlag, ApiError> {
        let clamped = RolloutPercentage::clamped(percentage);
        if i64::from(clamped.get()) != percentage {
            log::debug!("Rollout {} for flag {} clamped to {}", percentage, id, clamped);
        }
        let flag = self.store.set_rollout(id, clamped).await?;
        log::info!("Feature flag '{}' rollout set to {}", flag.key, clamped);
        Ok(flag)
    }

    /// Delete every assignment of a flag so the next evaluation of each user
    /// draws again. `confirm_key` must equal the flag's key.
    pub async fn reset_assignments(&self, id: i32, confirm_key: &str) -> Result<u64, ApiError> {
        let flag = self.require_flag(id).await?;
        if confirm_key != flag.key {
            return Err(ApiError::field(
                "confirm_key",
                format!("type '{}' to confirm the reset", flag.key),
            ));
        }

        let deleted = self.store.delete_assignments(id).await?;
        self.cache.invalidate_all();
        log::info!(
            "Reset {} assignments of feature flag '{}'",
            deleted,
            flag.key
        );
        Ok(deleted)
    }

    /// Remove a flag and, with it, all of its assignments.
    pub async fn delete_flag(&self, id: i32) -> Result<(), ApiError> {
        let flag = self.require_flag(id).await?;
        self.store.delete_flag(id).await?;
        self.cache.invalidate_all();
        log::info!("Feature flag '{}' deleted", flag.key);
        Ok(())
    }

    async fn require_flag(&self, id: i32) -> Result<FeatureFlag, ApiError> {
        self.store
            .find_flag(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Feature flag {} not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::flag_assignments::Variant;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    async fn setup() -> (Arc<MemoryStore>, FlagAdmin, FeatureFlag) {
        let store = Arc::new(MemoryStore::new());
        let admin = FlagAdmin::new(store.clone(), AssignmentCache::disabled());
        let flag = admin
            .create_flag(NewFlag {
                key: "new-dashboard".to_string(),
                description: Some("Redesigned dashboard".to_string()),
                enabled: true,
                rollout_percentage: RolloutPercentage::clamped(50),
            })
            .await
            .unwrap();
        (store, admin, flag)
    }

    #[actix_rt::test]
    async fn test_toggle_flips_and_keeps_assignments() {
        let (store, admin, flag) = setup().await;
        store
            .insert_assignment(flag.id, Uuid::new_v4(), Variant::Control)
            .await
            .unwrap();

        assert!(!admin.toggle_enabled(flag.id).await.unwrap().enabled);
        assert!(admin.toggle_enabled(flag.id).await.unwrap().enabled);
        assert_eq!(store.assignment_len(), 1);
    }

    #[actix_rt::test]
    async fn test_update_percentage_clamps() {
        let (_, admin, flag) = setup().await;
        let updated = admin.update_percentage(flag.id, 400).await.unwrap();
        assert_eq!(updated.rollout_percentage, RolloutPercentage::ALL);
        let updated = admin.update_percentage(flag.id, -1).await.unwrap();
        assert_eq!(updated.rollout_percentage, RolloutPercentage::NONE);
    }

    #[actix_rt::test]
    async fn test_reset_requires_matching_key() {
        let (store, admin, flag) = setup().await;
        store
            .insert_assignment(flag.id, Uuid::new_v4(), Variant::Treatment)
            .await
            .unwrap();

        let result = admin.reset_assignments(flag.id, "new-dash").await;
        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert_eq!(store.assignment_len(), 1);

        assert_eq!(admin.reset_assignments(flag.id, "new-dashboard").await.unwrap(), 1);
        assert_eq!(store.assignment_len(), 0);
        // Idempotent on an empty flag
        assert_eq!(admin.reset_assignments(flag.id, "new-dashboard").await.unwrap(), 0);
    }

    #[actix_rt::test]
    async fn test_list_includes_counts() {
        let (store, admin, flag) = setup().await;
        for variant in [Variant::Control, Variant::Control, Variant::Treatment] {
            store
                .insert_assignment(flag.id, Uuid::new_v4(), variant)
                .await
                .unwrap();
        }

        let flags = admin.list_flags().await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(
            flags[0].assignments,
            AssignmentCounts {
                control: 2,
                treatment: 1,
                total: 3
            }
        );
        assert_eq!(admin.get_flag(flag.id).await.unwrap().assignments.total, 3);
    }

    #[actix_rt::test]
    async fn test_unknown_flag_is_not_found() {
        let (_, admin, _) = setup().await;
        assert!(matches!(
            admin.toggle_enabled(999).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            admin.update_percentage(999, 10).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            admin.delete_flag(999).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
