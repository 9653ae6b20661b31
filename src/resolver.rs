//! Assignment resolution
//!
//! Answers "is this user in control or treatment for this flag". The first
//! evaluation for a `(flag, user)` pair draws against the flag's current
//! rollout percentage and persists the outcome; every later evaluation returns
//! the persisted variant, whatever the rollout percentage has become since.
//! Only a reset (see `admin::FlagAdmin::reset_assignments`) clears it.
//!
//! Resolution never fails. If the store misbehaves the caller still gets a
//! variant and the failure is logged.

use crate::cache::AssignmentCache;
use crate::orm::flag_assignments::Variant;
use crate::rollout::Draw;
use crate::store::FlagStore;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Why a variant was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// No flag with this key
    UnknownFlag,
    /// Flag exists but is switched off
    Disabled,
    /// Stored assignment returned
    Existing,
    /// First evaluation; new assignment persisted
    Assigned,
    /// Drawn but could not be persisted; valid for this request only
    Ephemeral,
    /// Flag could not be loaded
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub key: String,
    pub variant: Variant,
    pub reason: Reason,
}

impl Resolution {
    fn new(key: &str, variant: Variant, reason: Reason) -> Self {
        Self {
            key: key.to_string(),
            variant,
            reason,
        }
    }

    fn inactive(key: &str, reason: Reason) -> Self {
        Self::new(key, Variant::Control, reason)
    }

    /// True when the variant is backed by a stored assignment.
    pub fn is_persisted(&self) -> bool {
        matches!(self.reason, Reason::Existing | Reason::Assigned)
    }
}

/// Resolves variants for users. Handlers receive this as `Arc<dyn Resolve>`.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve(&self, flag_key: &str, user_id: Uuid) -> Resolution;

    /// Resolve several flags for one user concurrently.
    async fn resolve_many(&self, flag_keys: &[String], user_id: Uuid) -> Vec<Resolution> {
        join_all(flag_keys.iter().map(|key| self.resolve(key, user_id))).await
    }
}

/// Store-backed resolver.
pub struct AssignmentResolver {
    store: Arc<dyn FlagStore>,
    draw: Arc<dyn Draw>,
    cache: AssignmentCache,
}

impl AssignmentResolver {
    pub fn new(store: Arc<dyn FlagStore>, draw: Arc<dyn Draw>, cache: AssignmentCache) -> Self {
        Self { store, draw, cache }
    }
}

#[async_trait]
impl Resolve for AssignmentResolver {
    async fn resolve(&self, flag_key: &str, user_id: Uuid) -> Resolution {
        let flag = match self.store.find_flag_by_key(flag_key).await {
            Ok(Some(flag)) => flag,
            Ok(None) => return Resolution::inactive(flag_key, Reason::UnknownFlag),
            Err(e) => {
                log::error!("Failed to load feature flag '{}': {}", flag_key, e);
                return Resolution::inactive(flag_key, Reason::Unavailable);
            }
        };

        if !flag.enabled {
            return Resolution::inactive(flag_key, Reason::Disabled);
        }

        if let Some(variant) = self.cache.get(flag.id, user_id) {
            return Resolution::new(flag_key, variant, Reason::Existing);
        }

        let generation = self.cache.generation();
        match self.store.find_assignment(flag.id, user_id).await {
            Ok(Some(variant)) => {
                self.cache.insert(generation, flag.id, user_id, variant);
                return Resolution::new(flag_key, variant, Reason::Existing);
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "Failed to read assignment for flag '{}' user {}: {}",
                    flag_key,
                    user_id,
                    e
                );
            }
        }

        let drawn = flag.rollout_percentage.variant_for(self.draw.draw());

        match self.store.insert_assignment(flag.id, user_id, drawn).await {
            Ok(stored) => {
                self.cache.insert(generation, flag.id, user_id, stored.variant);
                let reason = if stored.inserted {
                    Reason::Assigned
                } else {
                    Reason::Existing
                };
                Resolution::new(flag_key, stored.variant, reason)
            }
            Err(e) => {
                log::error!(
                    "Failed to persist assignment for flag '{}' user {}; serving {} for this request: {}",
                    flag_key,
                    user_id,
                    drawn,
                    e
                );
                Resolution::new(flag_key, drawn, Reason::Ephemeral)
            }
        }
    }
}

/// Resolve several flags and collapse the result into `key -> variant`.
pub async fn variants_by_key(
    resolver: &dyn Resolve,
    flag_keys: &[String],
    user_id: Uuid,
) -> BTreeMap<String, Variant> {
    resolver
        .resolve_many(flag_keys, user_id)
        .await
        .into_iter()
        .map(|r| (r.key, r.variant))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::{FixedDraw, RolloutPercentage, SequenceDraw};
    use crate::store::{
        AssignmentCounts, FeatureFlag, MemoryStore, NewFlag, StoreError, StoredAssignment,
    };
    use std::collections::HashMap;
    use std::time::Duration;

    async fn store_with_flag(key: &str, pct: i64, enabled: bool) -> (Arc<MemoryStore>, i32) {
        let store = Arc::new(MemoryStore::new());
        let flag = store
            .create_flag(NewFlag {
                key: key.to_string(),
                description: None,
                enabled,
                rollout_percentage: RolloutPercentage::clamped(pct),
            })
            .await
            .unwrap();
        (store, flag.id)
    }

    fn resolver(store: Arc<dyn FlagStore>, draw: impl Draw + 'static) -> AssignmentResolver {
        AssignmentResolver::new(store, Arc::new(draw), AssignmentCache::disabled())
    }

    #[actix_rt::test]
    async fn test_unknown_flag_is_control() {
        let store = Arc::new(MemoryStore::new());
        let r = resolver(store.clone(), FixedDraw(0));

        let res = r.resolve("missing", Uuid::new_v4()).await;

        assert_eq!(res.variant, Variant::Control);
        assert_eq!(res.reason, Reason::UnknownFlag);
        assert_eq!(store.assignment_len(), 0);
    }

    #[actix_rt::test]
    async fn test_disabled_flag_creates_no_rows() {
        let (store, _) = store_with_flag("off", 100, false).await;
        let r = resolver(store.clone(), FixedDraw(0));

        for _ in 0..10 {
            let res = r.resolve("off", Uuid::new_v4()).await;
            assert_eq!(res.variant, Variant::Control);
            assert_eq!(res.reason, Reason::Disabled);
        }
        assert_eq!(store.assignment_len(), 0);
    }

    #[actix_rt::test]
    async fn test_stable_after_rollout_change() {
        let (store, flag_id) = store_with_flag("stable", 50, true).await;
        let r = resolver(store.clone(), SequenceDraw::new(vec![10, 90]));
        let user = Uuid::new_v4();

        let first = r.resolve("stable", user).await;
        assert_eq!(first.variant, Variant::Treatment);
        assert_eq!(first.reason, Reason::Assigned);

        for pct in [0, 25, 100] {
            store
                .set_rollout(flag_id, RolloutPercentage::clamped(pct))
                .await
                .unwrap();
            let again = r.resolve("stable", user).await;
            assert_eq!(again.variant, Variant::Treatment);
            assert_eq!(again.reason, Reason::Existing);
        }
        assert_eq!(store.assignment_len(), 1);
    }

    #[actix_rt::test]
    async fn test_boundaries() {
        let (store, _) = store_with_flag("none", 0, true).await;
        let r = resolver(store.clone(), SequenceDraw::new((0..100).collect()));
        for _ in 0..100 {
            assert_eq!(r.resolve("none", Uuid::new_v4()).await.variant, Variant::Control);
        }

        let (store, _) = store_with_flag("all", 100, true).await;
        let r = resolver(store.clone(), SequenceDraw::new((0..100).collect()));
        for _ in 0..100 {
            assert_eq!(r.resolve("all", Uuid::new_v4()).await.variant, Variant::Treatment);
        }
    }

    #[actix_rt::test]
    async fn test_cached_variant_respects_disable() {
        let (store, flag_id) = store_with_flag("cached", 100, true).await;
        let r = AssignmentResolver::new(
            store.clone(),
            Arc::new(FixedDraw(0)),
            AssignmentCache::new(Duration::from_secs(60), 100),
        );
        let user = Uuid::new_v4();
        assert_eq!(r.resolve("cached", user).await.variant, Variant::Treatment);

        store.set_enabled(flag_id, false).await.unwrap();

        let res = r.resolve("cached", user).await;
        assert_eq!(res.variant, Variant::Control);
        assert_eq!(res.reason, Reason::Disabled);
    }

    #[actix_rt::test]
    async fn test_resolve_many() {
        let (store, _) = store_with_flag("on", 100, true).await;
        let r = resolver(store.clone(), FixedDraw(0));

        let variants = variants_by_key(
            &r,
            &["on".to_string(), "missing".to_string()],
            Uuid::new_v4(),
        )
        .await;

        assert_eq!(variants["on"], Variant::Treatment);
        assert_eq!(variants["missing"], Variant::Control);
    }

    /// Delegates reads to a MemoryStore and fails every assignment write.
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl FlagStore for ReadOnlyStore {
        async fn find_flag(&self, id: i32) -> Result<Option<FeatureFlag>, StoreError> {
            self.0.find_flag(id).await
        }
        async fn find_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
            self.0.find_flag_by_key(key).await
        }
        async fn list_flags(&self) -> Result<Vec<FeatureFlag>, StoreError> {
            self.0.list_flags().await
        }
        async fn create_flag(&self, flag: NewFlag) -> Result<FeatureFlag, StoreError> {
            self.0.create_flag(flag).await
        }
        async fn set_enabled(&self, id: i32, enabled: bool) -> Result<FeatureFlag, StoreError> {
            self.0.set_enabled(id, enabled).await
        }
        async fn set_rollout(
            &self,
            id: i32,
            percentage: RolloutPercentage,
        ) -> Result<FeatureFlag, StoreError> {
            self.0.set_rollout(id, percentage).await
        }
        async fn delete_flag(&self, id: i32) -> Result<(), StoreError> {
            self.0.delete_flag(id).await
        }
        async fn find_assignment(
            &self,
            _flag_id: i32,
            _user_id: Uuid,
        ) -> Result<Option<Variant>, StoreError> {
            Err(StoreError::Database("connection refused".to_string()))
        }
        async fn insert_assignment(
            &self,
            _flag_id: i32,
            _user_id: Uuid,
            _variant: Variant,
        ) -> Result<StoredAssignment, StoreError> {
            Err(StoreError::Database("connection refused".to_string()))
        }
        async fn delete_assignments(&self, flag_id: i32) -> Result<u64, StoreError> {
            self.0.delete_assignments(flag_id).await
        }
        async fn assignment_counts(&self) -> Result<HashMap<i32, AssignmentCounts>, StoreError> {
            self.0.assignment_counts().await
        }
    }

    #[actix_rt::test]
    async fn test_fails_open_when_writes_fail() {
        let inner = MemoryStore::new();
        inner
            .create_flag(NewFlag {
                key: "flaky".to_string(),
                description: None,
                enabled: true,
                rollout_percentage: RolloutPercentage::ALL,
            })
            .await
            .unwrap();
        let store = Arc::new(ReadOnlyStore(inner));
        let r = AssignmentResolver::new(
            store.clone(),
            Arc::new(FixedDraw(0)),
            AssignmentCache::new(Duration::from_secs(60), 100),
        );

        let res = r.resolve("flaky", Uuid::new_v4()).await;

        assert_eq!(res.variant, Variant::Treatment);
        assert_eq!(res.reason, Reason::Ephemeral);
        assert!(!res.is_persisted());
        assert_eq!(store.0.assignment_len(), 0);
    }

    /// What `RacingStore` does around assignment reads.
    enum Race {
        /// Reads miss, as if another request wrote the row just after
        HideExisting,
        /// A reset (rows deleted, cache cleared) lands right after each hit
        ResetAfterRead(AssignmentCache),
    }

    /// MemoryStore with another request interleaved into assignment reads.
    struct RacingStore {
        inner: MemoryStore,
        race: Race,
    }

    #[async_trait]
    impl FlagStore for RacingStore {
        async fn find_flag(&self, id: i32) -> Result<Option<FeatureFlag>, StoreError> {
            self.inner.find_flag(id).await
        }
        async fn find_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
            self.inner.find_flag_by_key(key).await
        }
        async fn list_flags(&self) -> Result<Vec<FeatureFlag>, StoreError> {
            self.inner.list_flags().await
        }
        async fn create_flag(&self, flag: NewFlag) -> Result<FeatureFlag, StoreError> {
            self.inner.create_flag(flag).await
        }
        async fn set_enabled(&self, id: i32, enabled: bool) -> Result<FeatureFlag, StoreError> {
            self.inner.set_enabled(id, enabled).await
        }
        async fn set_rollout(
            &self,
            id: i32,
            percentage: RolloutPercentage,
        ) -> Result<FeatureFlag, StoreError> {
            self.inner.set_rollout(id, percentage).await
        }
        async fn delete_flag(&self, id: i32) -> Result<(), StoreError> {
            self.inner.delete_flag(id).await
        }
        async fn find_assignment(
            &self,
            flag_id: i32,
            user_id: Uuid,
        ) -> Result<Option<Variant>, StoreError> {
            let found = self.inner.find_assignment(flag_id, user_id).await?;
            match &self.race {
                Race::HideExisting => Ok(None),
                Race::ResetAfterRead(cache) => {
                    if found.is_some() {
                        self.inner.delete_assignments(flag_id).await?;
                        cache.invalidate_all();
                    }
                    Ok(found)
                }
            }
        }
        async fn insert_assignment(
            &self,
            flag_id: i32,
            user_id: Uuid,
            variant: Variant,
        ) -> Result<StoredAssignment, StoreError> {
            self.inner.insert_assignment(flag_id, user_id, variant).await
        }
        async fn delete_assignments(&self, flag_id: i32) -> Result<u64, StoreError> {
            self.inner.delete_assignments(flag_id).await
        }
        async fn assignment_counts(&self) -> Result<HashMap<i32, AssignmentCounts>, StoreError> {
            self.inner.assignment_counts().await
        }
    }

    async fn racing_store(pct: i64, race: Race) -> (Arc<RacingStore>, i32) {
        let inner = MemoryStore::new();
        let flag = inner
            .create_flag(NewFlag {
                key: "race".to_string(),
                description: None,
                enabled: true,
                rollout_percentage: RolloutPercentage::clamped(pct),
            })
            .await
            .unwrap();
        (Arc::new(RacingStore { inner, race }), flag.id)
    }

    #[actix_rt::test]
    async fn test_reset_during_read_is_not_cached() {
        let cache = AssignmentCache::new(Duration::from_secs(60), 100);
        let (store, flag_id) = racing_store(100, Race::ResetAfterRead(cache.clone())).await;
        let r = AssignmentResolver::new(store.clone(), Arc::new(FixedDraw(0)), cache.clone());
        let user = Uuid::new_v4();

        let first = r.resolve("race", user).await;
        assert_eq!(first.variant, Variant::Treatment);
        assert_eq!(first.reason, Reason::Assigned);

        // Force the next evaluation to read the store
        cache.invalidate_all();
        store
            .set_rollout(flag_id, RolloutPercentage::NONE)
            .await
            .unwrap();

        // Served from the row that was read, while the reset removes it
        let during = r.resolve("race", user).await;
        assert_eq!(during.variant, Variant::Treatment);
        assert_eq!(store.inner.assignment_len(), 0);
        assert_eq!(cache.get(flag_id, user), None);

        let after = r.resolve("race", user).await;
        assert_eq!(after.variant, Variant::Control);
        assert_eq!(after.reason, Reason::Assigned);
    }

    #[actix_rt::test]
    async fn test_losing_writer_reports_existing() {
        let (store, flag_id) = racing_store(100, Race::HideExisting).await;
        let user = Uuid::new_v4();
        store
            .inner
            .insert_assignment(flag_id, user, Variant::Treatment)
            .await
            .unwrap();
        let r = resolver(store.clone(), FixedDraw(0));

        // Draw agrees with the stored row, but this call wrote nothing
        let res = r.resolve("race", user).await;

        assert_eq!(res.variant, Variant::Treatment);
        assert_eq!(res.reason, Reason::Existing);
        assert_eq!(store.inner.assignment_len(), 1);
    }
}
