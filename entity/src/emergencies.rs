//! SeaORM Entity for the emergencies table.
//!
//! One row per SOS episode. Rows flip `is_active` true→false exactly once
//! (explicit cancel, auto-expiry, supersession or disconnect cleanup) and
//! are retained afterwards; the dispatch core never deletes them.

use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(schema_name = "resq", table_name = "emergencies")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    pub user_id: Id,

    pub is_active: bool,

    /// Origin coordinate captured at raise time.
    pub latitude: f64,
    pub longitude: f64,

    /// Optional base64 image snapshot attached by the raiser.
    pub image: Option<String>,

    /// AI triage assessment `{condition, severity, reasoning, action,
    /// location}`, attached once the summarizer resolves (or its fallback).
    pub ai_assessment: Option<Json>,

    /// Nearest-AED list captured at raise time.
    pub aed_snapshot: Option<Json>,

    pub created_at: DateTimeWithTimeZone,

    /// Immutable once set: `created_at` + the configured TTL.
    pub expires_at: DateTimeWithTimeZone,

    #[serde(skip_deserializing)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::users::Entity",
        from = "Column::UserId",
        to = "super::users::Column::Id",
        on_update = "NoAction",
        on_delete = "Cascade"
    )]
    Users,
}

impl Related<super::users::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
