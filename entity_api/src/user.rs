use super::error::{EntityApiErrorKind, Error};
use chrono::Utc;
use entity::users::{ActiveModel, Column, Entity, Model};
use entity::Id;
use log::*;
use sea_orm::sea_query::Expr;
use sea_orm::{entity::prelude::*, ActiveValue::Set, DatabaseConnection};

pub async fn create(db: &DatabaseConnection, user_model: Model) -> Result<Model, Error> {
    debug!("New User Model to be inserted: {user_model:?}");

    let now = Utc::now();
    let user_active_model: ActiveModel = ActiveModel {
        username: Set(user_model.username),
        name: Set(user_model.name),
        phone_number: Set(user_model.phone_number),
        medical: Set(user_model.medical),
        skills: Set(user_model.skills),
        latitude: Set(user_model.latitude),
        longitude: Set(user_model.longitude),
        latest_login_at: Set(user_model.latest_login_at),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
        ..Default::default()
    };

    Ok(user_active_model.insert(db).await?)
}

pub async fn find_by_id(db: &DatabaseConnection, id: Id) -> Result<Model, Error> {
    Entity::find_by_id(id).one(db).await?.ok_or_else(|| Error {
        source: None,
        error_kind: EntityApiErrorKind::RecordNotFound,
    })
}

/// All users other than `exclude` whose last-known coordinate is on record.
/// This is the fan-out enumeration; it stays a linear scan until a
/// geospatial index becomes worthwhile.
pub async fn find_located_excluding(
    db: &DatabaseConnection,
    exclude: Id,
) -> Result<Vec<Model>, Error> {
    Ok(Entity::find()
        .filter(Column::Id.ne(exclude))
        .filter(Column::Latitude.is_not_null())
        .filter(Column::Longitude.is_not_null())
        .all(db)
        .await?)
}

/// Last-write-wins update of a user's last-known coordinate. No history is
/// kept.
pub async fn update_location(
    db: &DatabaseConnection,
    id: Id,
    latitude: f64,
    longitude: f64,
) -> Result<(), Error> {
    let result = Entity::update_many()
        .col_expr(Column::Latitude, Expr::value(Some(latitude)))
        .col_expr(Column::Longitude, Expr::value(Some(longitude)))
        .col_expr(
            Column::UpdatedAt,
            Expr::value(DateTimeWithTimeZone::from(Utc::now())),
        )
        .filter(Column::Id.eq(id))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        return Err(Error {
            source: None,
            error_kind: EntityApiErrorKind::RecordNotFound,
        });
    }

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

    fn user_model() -> Model {
        let now = chrono::Utc::now();
        Model {
            id: Id::new_v4(),
            username: "dchia".to_owned(),
            name: "Dominic Chia".to_owned(),
            phone_number: "+6598765432".to_owned(),
            medical: None,
            skills: None,
            latitude: Some(1.30),
            longitude: Some(103.80),
            latest_login_at: Some(now.into()),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[tokio::test]
    async fn create_returns_a_new_user_model() -> Result<(), Error> {
        let model = user_model();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results(vec![vec![model.clone()]])
            .into_connection();

        let user = create(&db, model.clone()).await?;

        assert_eq!(user.username, model.username);

        Ok(())
    }

    #[tokio::test]
    async fn update_location_errors_for_an_unknown_user() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .into_connection();

        let result = update_location(&db, Id::new_v4(), 1.30, 103.80).await;

        assert_eq!(
            result.unwrap_err().error_kind,
            EntityApiErrorKind::RecordNotFound
        );
    }

    #[tokio::test]
    async fn update_location_succeeds_when_a_row_changes() -> Result<(), Error> {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results(vec![MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        update_location(&db, Id::new_v4(), 1.30, 103.80).await?;

        Ok(())
    }
}
