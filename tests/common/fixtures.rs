//! Test fixtures for creating test data
#![allow(dead_code)]

use rollout::rollout::RolloutPercentage;
use rollout::store::{FeatureFlag, FlagStore, NewFlag};

pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Register a flag with the given rollout
pub async fn create_test_flag(
    store: &dyn FlagStore,
    key: &str,
    rollout_percentage: i64,
    enabled: bool,
) -> FeatureFlag {
    store
        .create_flag(NewFlag {
            key: key.to_string(),
            description: Some(format!("Test flag {}", key)),
            enabled,
            rollout_percentage: RolloutPercentage::clamped(rollout_percentage),
        })
        .await
        .expect("Failed to create test flag")
}

pub fn bearer() -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", ADMIN_TOKEN))
}
