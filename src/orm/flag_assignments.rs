//! Per-user experiment assignment entity
//!
//! At most one row exists per `(feature_flag_id, user_id)`; the pair carries a
//! unique index (see `db::create_schema` and `migrations/`).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Experiment arm a user has been placed into.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[sea_orm(string_value = "control")]
    #[default]
    Control,
    #[sea_orm(string_value = "treatment")]
    Treatment,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Control => "control",
            Variant::Treatment => "treatment",
        }
    }

    /// Parse the stored string form. Used for aggregate rows, which come back untyped.
    pub fn from_db_str(value: &str) -> Option<Self> {
        match value {
            "control" => Some(Variant::Control),
            "treatment" => Some(Variant::Treatment),
            _ => None,
        }
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "flag_assignments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub feature_flag_id: i32,
    /// Hyphenated UUID issued by the identity provider.
    pub user_id: String,
    pub variant: Variant,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::feature_flags::Entity",
        from = "Column::FeatureFlagId",
        to = "super::feature_flags::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    FeatureFlag,
}

impl Related<super::feature_flags::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FeatureFlag.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
