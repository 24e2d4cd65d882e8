//! SeaORM Entity for the users table.
//!
//! Users are owned by the account-management side of the platform; the
//! dispatch core consults them for identity, the requester snapshot and the
//! last-known coordinate, and mutates only the coordinate columns.

use crate::Id;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(schema_name = "resq", table_name = "users")]
pub struct Model {
    #[serde(skip_deserializing)]
    #[sea_orm(primary_key)]
    pub id: Id,

    #[sea_orm(unique)]
    pub username: String,

    pub name: String,

    pub phone_number: String,

    /// Medical history entries: `[{condition, treatment, remarks}]`.
    /// Read-only to the dispatch core.
    pub medical: Option<Json>,

    /// Responder skills: `[{name, level}]`.
    pub skills: Option<Json>,

    /// Last-known coordinate, updated last-write-wins by location ingest
    /// and by a raise.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    /// Session epoch: timestamp of the most recent login, written by the
    /// (external) login flow. Tokens minted before this instant are stale.
    pub latest_login_at: Option<DateTimeWithTimeZone>,

    #[serde(skip_deserializing)]
    pub created_at: DateTimeWithTimeZone,

    #[serde(skip_deserializing)]
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::emergencies::Entity")]
    Emergencies,
}

impl Related<super::emergencies::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Emergencies.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
