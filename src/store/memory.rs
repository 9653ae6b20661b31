//! In-memory flag store.

use super::{AssignmentCounts, FeatureFlag, FlagStore, NewFlag, StoreError, StoredAssignment};
use crate::orm::flag_assignments::Variant;
use crate::rollout::RolloutPercentage;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use uuid::Uuid;

/// `DashMap`-backed store. Uniqueness of keys and `(flag, user)` pairs is
/// enforced through the map entry API.
#[derive(Debug)]
pub struct MemoryStore {
    flags: DashMap<i32, FeatureFlag>,
    keys: DashMap<String, i32>,
    assignments: DashMap<(i32, Uuid), Variant>,
    next_id: AtomicI32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            flags: DashMap::new(),
            keys: DashMap::new(),
            assignments: DashMap::new(),
            next_id: AtomicI32::new(1),
        }
    }

    /// Number of assignment rows currently held.
    pub fn assignment_len(&self) -> usize {
        self.assignments.len()
    }

    fn update_flag<F>(&self, id: i32, apply: F) -> Result<FeatureFlag, StoreError>
    where
        F: FnOnce(&mut FeatureFlag),
    {
        let mut flag = self.flags.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        apply(&mut flag);
        flag.updated_at = Utc::now().naive_utc();
        Ok(flag.clone())
    }
}

#[async_trait]
impl FlagStore for MemoryStore {
    async fn find_flag(&self, id: i32) -> Result<Option<FeatureFlag>, StoreError> {
        Ok(self.flags.get(&id).map(|f| f.clone()))
    }

    async fn find_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError> {
        let id = match self.keys.get(key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.find_flag(id).await
    }

    async fn list_flags(&self) -> Result<Vec<FeatureFlag>, StoreError> {
        let mut flags: Vec<FeatureFlag> = self.flags.iter().map(|f| f.clone()).collect();
        flags.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(flags)
    }

    async fn create_flag(&self, flag: NewFlag) -> Result<FeatureFlag, StoreError> {
        let id = match self.keys.entry(flag.key.clone()) {
            Entry::Occupied(_) => return Err(StoreError::DuplicateKey(flag.key)),
            Entry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(id);
                id
            }
        };

        let now = Utc::now().naive_utc();
        let created = FeatureFlag {
            id,
            key: flag.key,
            description: flag.description,
            enabled: flag.enabled,
            rollout_percentage: flag.rollout_percentage,
            created_at: now,
            updated_at: now,
        };
        self.flags.insert(id, created.clone());
        Ok(created)
    }

    async fn set_enabled(&self, id: i32, enabled: bool) -> Result<FeatureFlag, StoreError> {
        self.update_flag(id, |flag| flag.enabled = enabled)
    }

    async fn set_rollout(
        &self,
        id: i32,
        percentage: RolloutPercentage,
    ) -> Result<FeatureFlag, StoreError> {
        self.update_flag(id, |flag| flag.rollout_percentage = percentage)
    }

    async fn delete_flag(&self, id: i32) -> Result<(), StoreError> {
        let (_, flag) = self.flags.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.keys.remove(&flag.key);
        self.assignments.retain(|(flag_id, _), _| *flag_id != id);
        Ok(())
    }

    async fn find_assignment(
        &self,
        flag_id: i32,
        user_id: Uuid,
    ) -> Result<Option<Variant>, StoreError> {
        Ok(self.assignments.get(&(flag_id, user_id)).map(|v| *v))
    }

    async fn insert_assignment(
        &self,
        flag_id: i32,
        user_id: Uuid,
        variant: Variant,
    ) -> Result<StoredAssignment, StoreError> {
        if !self.flags.contains_key(&flag_id) {
            return Err(StoreError::NotFound(flag_id));
        }
        Ok(match self.assignments.entry((flag_id, user_id)) {
            Entry::Occupied(existing) => StoredAssignment {
                variant: *existing.get(),
                inserted: false,
            },
            Entry::Vacant(slot) => {
                slot.insert(variant);
                StoredAssignment {
                    variant,
                    inserted: true,
                }
            }
        })
    }

    async fn delete_assignments(&self, flag_id: i32) -> Result<u64, StoreError> {
        let before = self.assignments.len();
        self.assignments.retain(|(id, _), _| *id != flag_id);
        Ok(before.saturating_sub(self.assignments.len()) as u64)
    }

    async fn assignment_counts(&self) -> Result<HashMap<i32, AssignmentCounts>, StoreError> {
        let mut counts: HashMap<i32, AssignmentCounts> = HashMap::new();
        for entry in self.assignments.iter() {
            let (flag_id, _) = entry.key();
            counts.entry(*flag_id).or_default().record(*entry.value(), 1);
        }
        Ok(counts)
    }
}
