//! The dispatch engine: raise/cancel/expire/disconnect transitions,
//! geospatial fan-out, AED lookup, AI enrichment and push fallback.
//!
//! One engine instance exists per process. Per-user transitions are
//! serialized through a per-user async lock so concurrent raises, cancels,
//! expiries and disconnect cleanups for the same user cannot interleave;
//! work for different users proceeds concurrently. Every broadcast strictly
//! follows the successful persistence of the state change it announces.

use crate::error::Error;
use crate::gateway::aed::{AedClient, AedLocation};
use crate::gateway::groq::{EmergencyAssessment, GroqClient};
use crate::gateway::push::{PushClient, PushPayload};
use crate::geo::{self, Coordinates};
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use entity::{emergencies, users, Id};
use events::{DomainEvent, EventPublisher, NearbyRecipient};
use log::*;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use service::config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Push relay calls are bounded independently of the AED/AI budgets; they
/// never sit on the ack path at all.
const PUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A validated raise request.
#[derive(Debug, Clone)]
pub struct RaiseParams {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported GPS accuracy in meters; accepted and ignored.
    pub accuracy: Option<f64>,
    /// Optional base64 image snapshot; its presence enables AI triage.
    pub image: Option<String>,
}

/// What the raiser gets back in the acknowledgement.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseReceipt {
    pub emergency_id: Id,
    pub expires_at: DateTime<FixedOffset>,
    #[serde(rename = "nearestAEDs")]
    pub nearest_aeds: Vec<AedLocation>,
    /// Present only when the assessment resolved before the ack was built.
    #[serde(rename = "aiSummary", skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<Value>,
}

/// An in-flight emergency as delivered during subscribe-time resync.
#[derive(Debug, Clone)]
pub struct ActiveAlert {
    pub emergency_id: Id,
    pub owner_id: Id,
    pub latitude: f64,
    pub longitude: f64,
    pub expires_at: DateTime<FixedOffset>,
    pub distance_meters: f64,
    pub image: Option<String>,
    pub nearest_aeds: Value,
    pub ai_summary: Option<Value>,
    pub requester: Value,
}

pub struct Dispatcher {
    db: Arc<DatabaseConnection>,
    config: Config,
    publisher: EventPublisher,
    aed: Option<AedClient>,
    groq: Option<GroqClient>,
    push: Option<PushClient>,
    /// Armed expiry timers by emergency id; aborted on cancel, supersession
    /// and disconnect cleanup. A fired timer removes its own entry.
    expiry_timers: DashMap<Id, JoinHandle<()>>,
    /// Per-user transition locks. Buckets are created lazily and live for
    /// the process lifetime.
    user_locks: DashMap<Id, Arc<Mutex<()>>>,
}

impl Dispatcher {
    pub fn new(db: Arc<DatabaseConnection>, config: Config, publisher: EventPublisher) -> Self {
        let aed = match config.aed_base_url() {
            Some(url) => AedClient::new(&url, config.aed_timeout())
                .map_err(|e| warn!("Failed to build AED client: {e}"))
                .ok(),
            None => {
                info!("AED index not configured; raises will carry an empty facility list");
                None
            }
        };

        let groq = match config.groq_api_key() {
            Some(key) => GroqClient::new(&key, config.groq_base_url())
                .map_err(|e| warn!("Failed to build Groq client: {e}"))
                .ok(),
            None => {
                info!("Groq not configured; AI assessments will resolve to the fallback");
                None
            }
        };

        let push = match config.push_base_url() {
            Some(url) => PushClient::new(&url, PUSH_TIMEOUT)
                .map_err(|e| warn!("Failed to build push client: {e}"))
                .ok(),
            None => {
                info!("Push relay not configured; backgrounded responders will not be notified");
                None
            }
        };

        Self {
            db,
            config,
            publisher,
            aed,
            groq,
            push,
            expiry_timers: DashMap::new(),
            user_locks: DashMap::new(),
        }
    }

    /// Abort every armed expiry timer. Pending expirations are recovered on
    /// the next raise for the same user (supersession) or left to the
    /// database's `expires_at` as seen by resync filtering.
    pub fn shutdown(&self) {
        for entry in self.expiry_timers.iter() {
            entry.value().abort();
        }
        self.expiry_timers.clear();
    }

    fn user_lock(&self, user_id: Id) -> Arc<Mutex<()>> {
        self.user_locks.entry(user_id).or_default().clone()
    }

    /// Raise an emergency for `user` at the given origin.
    ///
    /// Ordering inside the user lock: supersede → persist → arm expiry →
    /// (everything that may announce the new emergency). The fan-out, push
    /// and AI tasks all start strictly after the insert commits, so no
    /// broadcast can ever name an emergency that failed to persist.
    pub async fn raise(
        self: &Arc<Self>,
        user: &users::Model,
        params: RaiseParams,
    ) -> Result<RaiseReceipt, Error> {
        let origin = Coordinates::new(params.latitude, params.longitude);
        if !origin.is_finite() {
            return Err(Error::validation("Latitude and longitude are required"));
        }

        let lock = self.user_lock(user.id);
        let _guard = lock.lock().await;

        // Supersession: one live emergency per user.
        self.deactivate_all_for(user.id).await?;

        let now = Utc::now();
        let ttl = chrono::Duration::seconds(self.config.emergency_ttl_secs as i64);
        let emergency = entity_api::emergency::create(
            &self.db,
            emergencies::Model {
                id: Id::new_v4(),
                user_id: user.id,
                is_active: true,
                latitude: params.latitude,
                longitude: params.longitude,
                image: params.image.clone(),
                ai_assessment: None,
                aed_snapshot: None,
                created_at: now.into(),
                expires_at: (now + ttl).into(),
                updated_at: now.into(),
            },
        )
        .await?;

        info!(
            "Emergency {} raised by user {} (expires {})",
            emergency.id, user.id, emergency.expires_at
        );

        // The raise doubles as a location fix; losing it costs accuracy,
        // not correctness.
        if let Err(e) =
            entity_api::user::update_location(&self.db, user.id, params.latitude, params.longitude)
                .await
        {
            warn!("Failed to update last-known location for user {}: {e}", user.id);
        }

        self.arm_expiry_timer(emergency.id, user.id, emergency.expires_at);

        let recipients = self.fan_out_recipients(user.id, origin).await;

        // Kicked off before the AED wait so a fast verdict can make the ack.
        // The barrier keeps the follow-up event behind the fan-out publish,
        // preserving per-emergency event order for recipients.
        let (published_tx, published_rx) = oneshot::channel();
        let ai_rx = self.spawn_assessment(&emergency, user, &recipients, published_rx);

        let nearest_aeds = self.find_nearest_aeds(origin).await;
        if !nearest_aeds.is_empty() {
            match serde_json::to_value(&nearest_aeds) {
                Ok(snapshot) => {
                    if let Err(e) =
                        entity_api::emergency::attach_aed_snapshot(&self.db, emergency.id, snapshot)
                            .await
                    {
                        warn!("Failed to persist AED snapshot for {}: {e}", emergency.id);
                    }
                }
                Err(e) => warn!("Failed to serialize AED snapshot: {e}"),
            }
        }

        let aeds_value = serde_json::to_value(&nearest_aeds).unwrap_or_else(|_| json!([]));
        let requester = crate::user::snapshot(user);

        self.publisher
            .publish(DomainEvent::EmergencyRaised {
                emergency_id: emergency.id,
                owner_id: user.id,
                latitude: params.latitude,
                longitude: params.longitude,
                expires_at: emergency.expires_at,
                image: emergency.image.clone(),
                nearest_aeds: aeds_value,
                requester,
                recipients: recipients.clone(),
            })
            .await;

        // Release the assessment task's follow-up event.
        let _ = published_tx.send(());

        self.spawn_push(user, &emergency, &recipients);

        let ai_summary = ai_rx.and_then(|mut rx| rx.try_recv().ok());

        Ok(RaiseReceipt {
            emergency_id: emergency.id,
            expires_at: emergency.expires_at,
            nearest_aeds,
            ai_summary,
        })
    }

    /// Explicitly cancel an emergency. Not idempotent: the record must
    /// exist, belong to the caller and still be active.
    pub async fn cancel(&self, user_id: Id, emergency_id: Id) -> Result<(), Error> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        let emergency = entity_api::emergency::find_by_id(&self.db, emergency_id).await?;

        if emergency.user_id != user_id {
            warn!("User {user_id} attempted to cancel foreign emergency {emergency_id}");
            return Err(Error::unauthorized());
        }

        let rows = entity_api::emergency::deactivate(&self.db, emergency_id).await?;
        if rows == 0 {
            // Already inactive: expired, superseded or cancelled earlier.
            return Err(Error::not_found());
        }

        if let Some((_, handle)) = self.expiry_timers.remove(&emergency_id) {
            handle.abort();
        }

        info!("Emergency {emergency_id} cancelled by its owner");

        self.publisher
            .publish(DomainEvent::EmergencyCancelled {
                emergency_id,
                owner_id: user_id,
            })
            .await;

        Ok(())
    }

    /// A user's last live connection dropped: a vanished client cannot
    /// meaningfully continue an emergency, so every active one it owns is
    /// deactivated and announced as cancelled.
    pub async fn disconnect_cleanup(&self, user_id: Id) {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        if let Err(e) = self.deactivate_all_for(user_id).await {
            error!("Disconnect cleanup for user {user_id} failed: {e}");
        }
    }

    /// Subscribe-time resync: every active, unexpired emergency within range
    /// of the subscriber's last-known coordinate, with whatever enrichment
    /// has already been attached.
    pub async fn resync(&self, subscriber: &users::Model) -> Result<Vec<ActiveAlert>, Error> {
        let viewer = match (subscriber.latitude, subscriber.longitude) {
            (Some(lat), Some(lon)) if Coordinates::new(lat, lon).is_finite() => {
                Coordinates::new(lat, lon)
            }
            // No coordinate on record: range cannot be evaluated, nothing
            // is delivered. The first location update fixes this.
            _ => return Ok(Vec::new()),
        };

        let now = Utc::now();
        let radius = self.config.alert_radius_meters;
        let rows = entity_api::emergency::find_active_with_owners(&self.db).await?;

        Ok(rows
            .into_iter()
            .filter_map(|(emergency, owner)| {
                if emergency.user_id == subscriber.id {
                    return None;
                }
                if emergency.expires_at.with_timezone(&Utc) <= now {
                    // The timer will flip it shortly; don't resurrect it.
                    return None;
                }

                let origin = Coordinates::new(emergency.latitude, emergency.longitude);
                let distance = geo::distance_meters(origin, viewer);
                if distance > radius {
                    return None;
                }

                let owner = owner?;

                Some(ActiveAlert {
                    emergency_id: emergency.id,
                    owner_id: emergency.user_id,
                    latitude: emergency.latitude,
                    longitude: emergency.longitude,
                    expires_at: emergency.expires_at,
                    distance_meters: distance,
                    image: emergency.image,
                    nearest_aeds: emergency.aed_snapshot.unwrap_or_else(|| json!([])),
                    ai_summary: emergency.ai_assessment,
                    requester: crate::user::snapshot(&owner),
                })
            })
            .collect())
    }

    /// Deactivate every active emergency the user owns, abort their timers
    /// and announce each cancellation. Shared by supersession and
    /// disconnect cleanup.
    async fn deactivate_all_for(&self, user_id: Id) -> Result<(), Error> {
        let active = entity_api::emergency::find_active_by_user(&self.db, user_id).await?;
        if active.is_empty() {
            return Ok(());
        }

        let ids: Vec<Id> = active.iter().map(|e| e.id).collect();
        entity_api::emergency::deactivate_many(&self.db, &ids).await?;

        for emergency in &active {
            if let Some((_, handle)) = self.expiry_timers.remove(&emergency.id) {
                handle.abort();
            }

            self.publisher
                .publish(DomainEvent::EmergencyCancelled {
                    emergency_id: emergency.id,
                    owner_id: user_id,
                })
                .await;
        }

        Ok(())
    }

    /// Arm the cancellable auto-expiry timer. At `expires_at` the task
    /// performs a compare-and-set deactivation: if an explicit cancel (or
    /// supersession) won the race, zero rows change and nothing is
    /// announced; otherwise the expiry is broadcast like any other
    /// cancellation so subscribers never hold a stale active view.
    fn arm_expiry_timer(
        self: &Arc<Self>,
        emergency_id: Id,
        owner_id: Id,
        expires_at: DateTime<FixedOffset>,
    ) {
        let dispatcher = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let delay = (expires_at.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            dispatcher.expire(emergency_id, owner_id).await;
        });

        self.expiry_timers.insert(emergency_id, handle);
    }

    async fn expire(&self, emergency_id: Id, owner_id: Id) {
        let lock = self.user_lock(owner_id);
        let _guard = lock.lock().await;

        self.expiry_timers.remove(&emergency_id);

        match entity_api::emergency::deactivate(&self.db, emergency_id).await {
            Ok(0) => debug!("Emergency {emergency_id} was already inactive at expiry"),
            Ok(_) => {
                info!("Emergency {emergency_id} auto-expired");
                self.publisher
                    .publish(DomainEvent::EmergencyCancelled {
                        emergency_id,
                        owner_id,
                    })
                    .await;
            }
            Err(e) => error!("Failed to expire emergency {emergency_id}: {e}"),
        }
    }

    /// Users inside the alert radius of the origin. A read failure degrades
    /// to an empty fan-out: the emergency is already durable and late
    /// subscribers recover it through resync.
    async fn fan_out_recipients(&self, raiser: Id, origin: Coordinates) -> Vec<NearbyRecipient> {
        let candidates = match entity_api::user::find_located_excluding(&self.db, raiser).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Failed to enumerate responders for fan-out: {e}");
                return Vec::new();
            }
        };

        select_recipients(origin, &candidates, self.config.alert_radius_meters)
    }

    /// Bounded AED lookup; failure or timeout degrades to an empty list.
    async fn find_nearest_aeds(&self, origin: Coordinates) -> Vec<AedLocation> {
        let Some(aed) = &self.aed else {
            return Vec::new();
        };

        let count = self.config.aed_result_count;
        match timeout(
            self.config.aed_timeout(),
            aed.find_nearest(origin.latitude, origin.longitude, count),
        )
        .await
        {
            Ok(Ok(facilities)) => facilities,
            Ok(Err(e)) => {
                warn!("AED lookup failed: {e}");
                Vec::new()
            }
            Err(_) => {
                warn!("AED lookup timed out");
                Vec::new()
            }
        }
    }

    /// Best-effort AI triage, decoupled from the ack path. Returns a
    /// receiver the raise handler polls once when building the ack; the
    /// spawned task also persists the verdict and publishes the follow-up
    /// event once `published` fires. No image, no assessment.
    fn spawn_assessment(
        self: &Arc<Self>,
        emergency: &emergencies::Model,
        user: &users::Model,
        recipients: &[NearbyRecipient],
        published: oneshot::Receiver<()>,
    ) -> Option<oneshot::Receiver<Value>> {
        let image = emergency.image.clone()?;

        let (tx, rx) = oneshot::channel();
        let dispatcher = Arc::clone(self);
        let emergency_id = emergency.id;
        let owner_id = user.id;
        let medical = user.medical.clone();
        let notify_user_ids: Vec<Id> = recipients.iter().map(|r| r.user_id).collect();

        tokio::spawn(async move {
            let assessment = dispatcher.assess_with_fallback(&image, medical.as_ref()).await;
            let value = serde_json::to_value(&assessment).unwrap_or_else(|_| json!(null));

            if let Err(e) =
                entity_api::emergency::attach_assessment(&dispatcher.db, emergency_id, value.clone())
                    .await
            {
                warn!("Failed to persist assessment for {emergency_id}: {e}");
            }

            // The raise handler may long since have acked; that's fine.
            let _ = tx.send(value.clone());

            // Wait for the fan-out publish so recipients never see the
            // assessment before the emergency itself. A dropped sender just
            // means the raise path is gone; proceed regardless.
            let _ = published.await;

            dispatcher
                .publisher
                .publish(DomainEvent::EmergencyAssessed {
                    emergency_id,
                    owner_id,
                    assessment: value,
                    notify_user_ids,
                })
                .await;
        });

        Some(rx)
    }

    async fn assess_with_fallback(
        &self,
        image: &str,
        medical: Option<&Value>,
    ) -> EmergencyAssessment {
        let Some(groq) = &self.groq else {
            return EmergencyAssessment::unavailable("AI service not configured.");
        };

        match timeout(
            self.config.ai_timeout(),
            groq.assess_emergency(image, medical),
        )
        .await
        {
            Ok(Ok(assessment)) => assessment,
            Ok(Err(e)) => {
                warn!("AI assessment failed: {e}");
                EmergencyAssessment::unavailable("AI Service Unavailable.")
            }
            Err(_) => {
                warn!("AI assessment timed out");
                EmergencyAssessment::unavailable("AI assessment timed out.")
            }
        }
    }

    /// Push fallback for backgrounded apps: every fanned-out user gets one,
    /// regardless of socket-subscription state. Fire-and-forget.
    fn spawn_push(
        &self,
        user: &users::Model,
        emergency: &emergencies::Model,
        recipients: &[NearbyRecipient],
    ) {
        let Some(push) = self.push.clone() else {
            return;
        };
        if recipients.is_empty() {
            return;
        }

        let user_ids: Vec<Id> = recipients.iter().map(|r| r.user_id).collect();
        let payload = PushPayload {
            title: "SOS nearby".to_string(),
            body: format!("{} needs help near you", user.name),
            data: json!({
                "emergencyId": emergency.id,
                "ownerId": user.id,
                "latitude": emergency.latitude,
                "longitude": emergency.longitude,
                "expiresAt": emergency.expires_at,
            }),
        };

        tokio::spawn(async move {
            match push.send_to_users(&user_ids, &payload).await {
                Ok(results) => {
                    for result in results.iter().filter(|r| !r.success) {
                        warn!(
                            "Push delivery to user {} failed: {}",
                            result.user_id,
                            result.error.as_deref().unwrap_or("unknown")
                        );
                    }
                }
                Err(e) => warn!("Push relay call failed: {e}"),
            }
        });
    }
}

/// Pure range filter over the candidate responders. Candidates without a
/// finite coordinate never match (haversine yields NaN).
fn select_recipients(
    origin: Coordinates,
    candidates: &[users::Model],
    radius_meters: f64,
) -> Vec<NearbyRecipient> {
    candidates
        .iter()
        .filter_map(|candidate| {
            let coords = Coordinates::new(candidate.latitude?, candidate.longitude?);
            if !coords.is_finite() {
                return None;
            }

            let distance_meters = geo::distance_meters(origin, coords);
            (distance_meters <= radius_meters).then_some(NearbyRecipient {
                user_id: candidate.id,
                distance_meters,
            })
        })
        .collect()
}
