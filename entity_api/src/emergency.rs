use super::error::{EntityApiErrorKind, Error};
use chrono::Utc;
use entity::emergencies::{ActiveModel, Column, Entity, Model};
use entity::{users, Id};
use log::*;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::prelude::*, ActiveValue::Set, DatabaseConnection, QueryOrder};

pub async fn create(db: &DatabaseConnection, emergency_model: Model) -> Result<Model, Error> {
    debug!("New Emergency Model to be inserted: {emergency_model:?}");

    let now = Utc::now();
    let emergency_active_model: ActiveModel = ActiveModel {
        user_id: Set(emergency_model.user_id),
        is_active: Set(emergency_model.is_active),
        latitude: Set(emergency_model.latitude),
        longitude: Set(emergency_model.longitude),
        image: Set(emergency_model.image),
        ai_assessment: Set(emergency_model.ai_assessment),
        aed_snapshot: Set(emergency_model.aed_snapshot),
        created_at: Set(emergency_model.created_at),
        expires_at: Set(emergency_model.expires_at),
        updated_at: Set(now.into()),
        ..Default::default()
    };

    Ok(emergency_active_model.insert(db).await?)
}

pub async fn find_by_id(db: &DatabaseConnection, id: Id) -> Result<Model, Error> {
    Entity::find_by_id(id).one(db).await?.ok_or_else(|| Error {
        source: None,
        error_kind: EntityApiErrorKind::RecordNotFound,
    })
}

/// The caller's currently-active emergencies, oldest first. The one-active
/// invariant makes more than one element a sign of prior interleaving that
/// supersession is about to repair.
pub async fn find_active_by_user(db: &DatabaseConnection, user_id: Id) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::UserId.eq(user_id))
        .filter(Column::IsActive.eq(true))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?)
}

/// Every active emergency joined with its owner, for subscribe-time resync.
pub async fn find_active_with_owners(
    db: &DatabaseConnection,
) -> Result<Vec<(Model, Option<users::Model>)>, Error> {
    Ok(Entity::find()
        .filter(Column::IsActive.eq(true))
        .find_also_related(users::Entity)
        .all(db)
        .await?)
}

/// Compare-and-set deactivation: flips `is_active` only while it is still
/// true. Returns the number of rows affected (0 means the record was already
/// inactive, or does not exist). This is the primitive the expiry timer and
/// explicit cancel both race through safely.
pub async fn deactivate(db: &DatabaseConnection, id: Id) -> Result<u64, Error> {
    let result = Entity::update_many()
        .col_expr(Column::IsActive, Expr::value(false))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(DateTimeWithTimeZone::from(Utc::now())),
        )
        .filter(Column::Id.eq(id))
        .filter(Column::IsActive.eq(true))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Deactivate a batch of emergencies in one statement (supersession and
/// disconnect cleanup). Rows already inactive are left untouched.
pub async fn deactivate_many(db: &DatabaseConnection, ids: &[Id]) -> Result<u64, Error> {
    if ids.is_empty() {
        return Ok(0);
    }

    let result = Entity::update_many()
        .col_expr(Column::IsActive, Expr::value(false))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(DateTimeWithTimeZone::from(Utc::now())),
        )
        .filter(Column::Id.is_in(ids.iter().copied()))
        .filter(Column::IsActive.eq(true))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Attach the AI triage assessment to a persisted emergency. The record may
/// already be inactive by the time the summarizer resolves; the assessment
/// is attached regardless so the episode's history stays complete.
pub async fn attach_assessment(
    db: &DatabaseConnection,
    id: Id,
    assessment: serde_json::Value,
) -> Result<(), Error> {
    Entity::update_many()
        .col_expr(Column::AiAssessment, Expr::value(assessment))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(DateTimeWithTimeZone::from(Utc::now())),
        )
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    Ok(())
}

/// Attach the nearest-AED snapshot captured during the raise.
pub async fn attach_aed_snapshot(
    db: &DatabaseConnection,
    id: Id,
    snapshot: serde_json::Value,
) -> Result<(), Error> {
    Entity::update_many()
        .col_expr(Column::AedSnapshot, Expr::value(snapshot))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(DateTimeWithTimeZone::from(Utc::now())),
        )
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    Ok(())
}

#[cfg(test)]
// We need to gate seaORM's mock feature behind conditional compilation because
// the feature removes the Clone trait implementation from seaORM's DatabaseConnection.
// see https://github.com/SeaQL/sea-orm/issues/830
#[cfg(feature = "mock")]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn emergency_model(is_active: bool) -> Model {
        let now = chrono::Utc::now();
        Model {
            id: Id::new_v4(),
            user_id: Id::new_v4(),
            is_active,
            latitude: 1.30,
            longitude: 103.80,
            image: None,
            ai_assessment: None,
            aed_snapshot: None,
            created_at: now.into(),
            expires_at: (now + chrono::Duration::minutes(10)).into(),
            updated_at: now.into(),
        }
    }

    #[tokio::test]
    async fn create_returns_a_new_emergency_model() -> Result<(), Error> {
        let model = emergency_model(true);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let emergency = create(&db, model.clone()).await?;

        assert_eq!(emergency.id, model.id);
        assert!(emergency.is_active);

        Ok(())
    }

    #[tokio::test]
    async fn deactivate_reports_zero_rows_for_an_already_inactive_record() -> Result<(), Error> {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let rows = deactivate(&db, Id::new_v4()).await?;

        assert_eq!(rows, 0);

        Ok(())
    }

    #[tokio::test]
    async fn deactivate_reports_one_row_for_an_active_record() -> Result<(), Error> {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let rows = deactivate(&db, Id::new_v4()).await?;

        assert_eq!(rows, 1);

        Ok(())
    }

    #[tokio::test]
    async fn deactivate_many_skips_the_database_for_an_empty_batch() -> Result<(), Error> {
        // No exec results appended: any statement would panic the mock.
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();

        let rows = deactivate_many(&db, &[]).await?;

        assert_eq!(rows, 0);

        Ok(())
    }

    #[tokio::test]
    async fn find_by_id_errors_when_the_record_is_missing() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![Vec::<Model>::new()])
            .into_connection();

        let result = find_by_id(&db, Id::new_v4()).await;

        assert_eq!(
            result.unwrap_err().error_kind,
            EntityApiErrorKind::RecordNotFound
        );
    }

    #[tokio::test]
    async fn find_active_by_user_returns_the_mocked_rows() -> Result<(), Error> {
        let model = emergency_model(true);
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let active = find_active_by_user(&db, model.user_id).await?;

        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, model.id);

        Ok(())
    }
}
