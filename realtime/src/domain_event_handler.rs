use crate::manager::{Manager, MessageScope};
use crate::message::{NearbyPayload, ServerEvent};
use async_trait::async_trait;
use events::{DomainEvent, EventHandler};
use log::*;
use std::sync::Arc;

/// Handles domain events by converting them to wire frames and routing them
/// to the affected connections.
///
/// The dispatch engine decides *who* is affected (it computed the fan-out
/// recipients and their distances); this handler only converts and routes.
pub struct RealtimeEventHandler {
    manager: Arc<Manager>,
}

impl RealtimeEventHandler {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for RealtimeEventHandler {
    async fn handle(&self, event: &DomainEvent) {
        match event {
            DomainEvent::EmergencyRaised {
                emergency_id,
                owner_id,
                latitude,
                longitude,
                expires_at,
                image,
                nearest_aeds,
                requester,
                recipients,
            } => {
                debug!(
                    "Fanning out emergency {emergency_id} to {} recipient(s)",
                    recipients.len()
                );

                // One frame per recipient: the distance is theirs alone.
                for recipient in recipients {
                    let frame = ServerEvent::EmergencyNearby(NearbyPayload {
                        emergency_id: *emergency_id,
                        owner_id: *owner_id,
                        latitude: *latitude,
                        longitude: *longitude,
                        expires_at: *expires_at,
                        distance: recipient.distance_meters,
                        image: image.clone(),
                        nearest_aeds: nearest_aeds.clone(),
                        ai_summary: None,
                        requester: requester.clone(),
                    });

                    self.manager.send_event(
                        frame,
                        MessageScope::Subscribers {
                            user_id: recipient.user_id,
                        },
                    );
                }
            }

            DomainEvent::EmergencyCancelled {
                emergency_id,
                owner_id,
            } => {
                debug!("Broadcasting cancellation of emergency {emergency_id}");

                self.manager.send_event(
                    ServerEvent::EmergencyCancelled {
                        emergency_id: *emergency_id,
                        owner_id: *owner_id,
                    },
                    MessageScope::AllSubscribers,
                );
            }

            DomainEvent::EmergencyAssessed {
                emergency_id,
                owner_id,
                assessment,
                notify_user_ids,
            } => {
                debug!("Routing assessment for emergency {emergency_id}");

                let frame = ServerEvent::EmergencyAssessment {
                    emergency_id: *emergency_id,
                    owner_id: *owner_id,
                    assessment: assessment.clone(),
                };

                // The raiser gets it on every live connection; they were
                // promised a follow-up in the raise ack.
                self.manager
                    .send_event(frame.clone(), MessageScope::User { user_id: *owner_id });

                for user_id in notify_user_ids {
                    self.manager.send_event(
                        frame.clone(),
                        MessageScope::Subscribers { user_id: *user_id },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::NearbyRecipient;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn raised_event(recipient: events::Id, distance: f64) -> DomainEvent {
        DomainEvent::EmergencyRaised {
            emergency_id: events::Id::new_v4(),
            owner_id: events::Id::new_v4(),
            latitude: 1.30,
            longitude: 103.80,
            expires_at: chrono::Utc::now().into(),
            image: None,
            nearest_aeds: json!([]),
            requester: json!({"name": "Dominic Chia"}),
            recipients: vec![NearbyRecipient {
                user_id: recipient,
                distance_meters: distance,
            }],
        }
    }

    #[tokio::test]
    async fn raised_event_reaches_subscribed_recipients_with_their_distance() {
        let manager = Arc::new(Manager::new());
        let handler = RealtimeEventHandler::new(manager.clone());

        let responder = events::Id::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = manager.register_connection(responder, tx);
        manager.subscribe(&conn);

        handler.handle(&raised_event(responder, 2000.0)).await;

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "emergency:nearby");
        assert_eq!(frame["data"]["distance"], 2000.0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn raised_event_skips_unsubscribed_recipients() {
        let manager = Arc::new(Manager::new());
        let handler = RealtimeEventHandler::new(manager.clone());

        let responder = events::Id::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _conn = manager.register_connection(responder, tx);
        // No subscribe.

        handler.handle(&raised_event(responder, 2000.0)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancellation_reaches_every_subscriber() {
        let manager = Arc::new(Manager::new());
        let handler = RealtimeEventHandler::new(manager.clone());

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        let conn_a = manager.register_connection(events::Id::new_v4(), tx_a);
        let conn_b = manager.register_connection(events::Id::new_v4(), tx_b);
        manager.subscribe(&conn_a);
        manager.subscribe(&conn_b);

        handler
            .handle(&DomainEvent::EmergencyCancelled {
                emergency_id: events::Id::new_v4(),
                owner_id: events::Id::new_v4(),
            })
            .await;

        for rx in [&mut rx_a, &mut rx_b] {
            let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(frame["event"], "emergency:cancelled");
        }
    }

    #[tokio::test]
    async fn assessment_reaches_the_raiser_even_when_unsubscribed() {
        let manager = Arc::new(Manager::new());
        let handler = RealtimeEventHandler::new(manager.clone());

        let raiser = events::Id::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _conn = manager.register_connection(raiser, tx);

        handler
            .handle(&DomainEvent::EmergencyAssessed {
                emergency_id: events::Id::new_v4(),
                owner_id: raiser,
                assessment: json!({"condition": "Unclear"}),
                notify_user_ids: vec![],
            })
            .await;

        let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "emergency:assessment");
        assert_eq!(frame["data"]["assessment"]["condition"], "Unclear");
    }
}
