//! Persistence abstraction for flags and assignments.
//!
//! Supports multiple backends:
//! - `db`: SeaORM over Postgres or SQLite
//! - `memory`: in-process maps, for tests and single-node demos

pub mod db;
pub mod memory;

use crate::orm::{feature_flags, flag_assignments::Variant};
use crate::rollout::RolloutPercentage;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

pub use db::DbStore;
pub use memory::MemoryStore;

/// A flag as seen by the resolver and the admin surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureFlag {
    pub id: i32,
    pub key: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub rollout_percentage: RolloutPercentage,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<feature_flags::Model> for FeatureFlag {
    fn from(model: feature_flags::Model) -> Self {
        Self {
            id: model.id,
            key: model.key,
            description: model.description,
            enabled: model.enabled,
            rollout_percentage: RolloutPercentage::from(model.rollout_percentage),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Fields needed to register a flag.
#[derive(Debug, Clone)]
pub struct NewFlag {
    pub key: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub rollout_percentage: RolloutPercentage,
}

/// Live assignment counts for one flag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssignmentCounts {
    pub control: u64,
    pub treatment: u64,
    pub total: u64,
}

impl AssignmentCounts {
    /// Add `n` assignments of `variant`.
    pub fn record(&mut self, variant: Variant, n: u64) {
        match variant {
            Variant::Control => self.control += n,
            Variant::Treatment => self.treatment += n,
        }
        self.total += n;
    }
}

/// Store operation errors.
#[derive(Debug)]
pub enum StoreError {
    /// Backend unreachable or query failed
    Database(String),
    /// No flag with this id
    NotFound(i32),
    /// A flag with this key already exists
    DuplicateKey(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(msg) => write!(f, "Database error: {}", msg),
            StoreError::NotFound(id) => write!(f, "Feature flag {} not found", id),
            StoreError::DuplicateKey(key) => write!(f, "Feature flag '{}' already exists", key),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sea_orm::DbErr> for StoreError {
    fn from(e: sea_orm::DbErr) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result of `FlagStore::insert_assignment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredAssignment {
    pub variant: Variant,
    /// False when an earlier writer's row was kept
    pub inserted: bool,
}

/// Trait for flag/assignment backends.
///
/// Implementations must enforce at most one assignment per `(flag, user)`.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn find_flag(&self, id: i32) -> Result<Option<FeatureFlag>, StoreError>;

    async fn find_flag_by_key(&self, key: &str) -> Result<Option<FeatureFlag>, StoreError>;

    /// All flags ordered by key.
    async fn list_flags(&self) -> Result<Vec<FeatureFlag>, StoreError>;

    async fn create_flag(&self, flag: NewFlag) -> Result<FeatureFlag, StoreError>;

    async fn set_enabled(&self, id: i32, enabled: bool) -> Result<FeatureFlag, StoreError>;

    async fn set_rollout(
        &self,
        id: i32,
        percentage: RolloutPercentage,
    ) -> Result<FeatureFlag, StoreError>;

    /// Remove a flag together with all of its assignments.
    async fn delete_flag(&self, id: i32) -> Result<(), StoreError>;

    async fn find_assignment(
        &self,
        flag_id: i32,
        user_id: Uuid,
    ) -> Result<Option<Variant>, StoreError>;

    /// Persist a first-time assignment and report the variant that is now stored.
    ///
    /// If another writer got there first, the existing variant wins and is
    /// returned with `inserted == false`.
    async fn insert_assignment(
        &self,
        flag_id: i32,
        user_id: Uuid,
        variant: Variant,
    ) -> Result<StoredAssignment, StoreError>;

    /// Delete every assignment of a flag, returning how many were removed.
    async fn delete_assignments(&self, flag_id: i32) -> Result<u64, StoreError>;

    /// Counts per flag id. Flags without assignments may be absent.
    async fn assignment_counts(&self) -> Result<HashMap<i32, AssignmentCounts>, StoreError>;

    async fn assignment_counts_for(&self, flag_id: i32) -> Result<AssignmentCounts, StoreError> {
        Ok(self
            .assignment_counts()
            .await?
            .remove(&flag_id)
            .unwrap_or_default())
    }
}
