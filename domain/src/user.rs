//! User-facing operations of the dispatch core: connection authentication
//! (the session/connection binder), location ingest, and the requester
//! snapshot projected onto fan-out events.

use crate::error::Error;
use crate::geo::Coordinates;
use crate::jwt;
use entity::{users, Id};
use entity_api::error::EntityApiErrorKind;
use log::*;
use sea_orm::DatabaseConnection;
use serde_json::{json, Value};
use service::config::Config;

pub use entity_api::user::create;

/// Look a user up by id, translating the entity layer's error.
pub async fn find_by_id(db: &DatabaseConnection, id: Id) -> Result<users::Model, Error> {
    Ok(entity_api::user::find_by_id(db, id).await?)
}

/// Binds a bearer credential to a user identity at connection establishment.
///
/// Two gates, in order:
/// 1. signature/expiry verification of the token itself;
/// 2. the token's session epoch against the login timestamp on record.
///
/// A session-epoch mismatch means the account logged in on another device
/// after this token was minted; the connection is refused outright with
/// DEVICE_MISMATCH and no state is created. There is no retry at this layer.
pub async fn authenticate_connection(
    db: &DatabaseConnection,
    config: &Config,
    token: &str,
) -> Result<users::Model, Error> {
    let claims = jwt::verify_access_token(config, token)?;

    let user_id = Id::parse_str(&claims.sub).map_err(|_| {
        warn!("Access token subject is not a valid user id");
        Error::invalid_token()
    })?;

    let user = match entity_api::user::find_by_id(db, user_id).await {
        Ok(user) => user,
        // A verified token naming a nonexistent user is still a bad token.
        Err(e) if e.error_kind == EntityApiErrorKind::RecordNotFound => {
            return Err(Error::invalid_token())
        }
        Err(e) => return Err(e.into()),
    };

    let recorded_epoch = match user.latest_login_at {
        Some(ts) => ts.timestamp(),
        None => {
            warn!("User {user_id} has no recorded login; refusing connection");
            return Err(Error::device_mismatch());
        }
    };

    if claims.session != recorded_epoch {
        info!("Stale session epoch for user {user_id}; a newer device holds the session");
        return Err(Error::device_mismatch());
    }

    Ok(user)
}

/// Location ingest: validate finiteness, persist last-write-wins.
pub async fn update_location(
    db: &DatabaseConnection,
    user_id: Id,
    latitude: f64,
    longitude: f64,
) -> Result<(), Error> {
    if !Coordinates::new(latitude, longitude).is_finite() {
        return Err(Error::validation("Invalid location payload"));
    }

    entity_api::user::update_location(db, user_id, latitude, longitude).await?;

    Ok(())
}

/// The requester snapshot carried on `emergency:nearby` frames: enough for
/// a responder to identify, reach and medically brief themselves on the
/// person raising the alarm.
pub fn snapshot(user: &users::Model) -> Value {
    json!({
        "id": user.id,
        "name": user.name,
        "username": user.username,
        "phoneNumber": user.phone_number,
        "medical": user.medical,
        "skills": user.skills,
    })
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    fn user_model() -> users::Model {
        let now = chrono::Utc::now();
        users::Model {
            id: Id::new_v4(),
            username: "dchia".to_owned(),
            name: "Dominic Chia".to_owned(),
            phone_number: "+6598765432".to_owned(),
            medical: Some(json!([{"condition": "Asthma"}])),
            skills: None,
            latitude: Some(1.30),
            longitude: Some(103.80),
            latest_login_at: Some(now.into()),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn snapshot_projects_contact_and_medical_fields() {
        let user = user_model();
        let value = snapshot(&user);

        assert_eq!(value["phoneNumber"], "+6598765432");
        assert_eq!(value["medical"][0]["condition"], "Asthma");
        assert_eq!(value["username"], "dchia");
        // The coordinate is not part of the snapshot; the event carries the
        // emergency origin instead.
        assert!(value.get("latitude").is_none());
    }
}
