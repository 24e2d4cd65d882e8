use chrono::Utc;
use log::*;
use sea_orm::DatabaseConnection;
use serde_json::json;

pub use entity::{emergencies, users, Id};

pub mod emergency;
pub mod error;
pub mod user;

/// Seeds a handful of responders clustered around central Singapore so the
/// dispatch paths (fan-out, resync, AED snapshots) have something to chew on
/// in development. Intended to be run via the `seed_db` binary against an
/// empty database; duplicate usernames will simply log and skip.
pub async fn seed_database(db: &DatabaseConnection) {
    let now = Utc::now();

    let responders = vec![
        users::Model {
            id: Id::new_v4(),
            username: "dchia".to_owned(),
            name: "Dominic Chia".to_owned(),
            phone_number: "+6598765432".to_owned(),
            medical: Some(json!([
                {"condition": "Asthma", "treatment": "Inhaler", "remarks": "Mild"}
            ])),
            skills: Some(json!([{"name": "CPR", "level": "proficient"}])),
            latitude: Some(1.3000),
            longitude: Some(103.8000),
            latest_login_at: Some(now.into()),
            created_at: now.into(),
            updated_at: now.into(),
        },
        users::Model {
            id: Id::new_v4(),
            username: "wlim".to_owned(),
            name: "Wei Lim".to_owned(),
            phone_number: "+6591234567".to_owned(),
            medical: None,
            skills: Some(json!([{"name": "First Aid", "level": "professional"}])),
            latitude: Some(1.3180),
            longitude: Some(103.8005),
            latest_login_at: Some(now.into()),
            created_at: now.into(),
            updated_at: now.into(),
        },
        users::Model {
            id: Id::new_v4(),
            username: "atan".to_owned(),
            name: "Aisyah Tan".to_owned(),
            phone_number: "+6590001111".to_owned(),
            medical: None,
            skills: None,
            // No known location yet: exercises the "skipped by fan-out" path.
            latitude: None,
            longitude: None,
            latest_login_at: Some(now.into()),
            created_at: now.into(),
            updated_at: now.into(),
        },
    ];

    for responder in responders {
        let username = responder.username.clone();
        match user::create(db, responder).await {
            Ok(created) => info!("Seeded user {} ({})", created.username, created.id),
            Err(e) => warn!("Skipping seed user {username}: {e}"),
        }
    }
}
