//! Event system infrastructure for the ResQ dispatch core.
//!
//! This crate provides the event system that enables loose coupling between
//! the dispatch engine and infrastructure concerns (realtime broadcast, push
//! delivery logging).
//!
//! # Architecture
//!
//! - **DomainEvent**: Enum representing the emergency lifecycle events
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates (entity, domain, etc.),
//! avoiding circular dependencies. Entity data is carried as serialized JSON
//! values; recipients are carried as plain ids with their precomputed
//! distances.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A type alias that represents any Entity's internal id field data type.
/// This matches the definition in the entity crate to maintain compatibility.
pub type Id = Uuid;

/// A fan-out recipient: a user within the alert radius of an emergency's
/// origin, with the haversine distance computed by the dispatch engine.
#[derive(Debug, Clone, Serialize)]
pub struct NearbyRecipient {
    pub user_id: Id,
    pub distance_meters: f64,
}

/// Domain events emitted by the dispatch engine after the corresponding
/// state change has been durably persisted. The engine determines which
/// users are affected; handlers only route.
#[derive(Debug, Clone)]
pub enum DomainEvent {
    /// A new emergency went ACTIVE. Carries everything a responder-facing
    /// `emergency:nearby` frame needs, plus the per-recipient distances.
    EmergencyRaised {
        emergency_id: Id,
        owner_id: Id,
        latitude: f64,
        longitude: f64,
        expires_at: DateTime<FixedOffset>,
        /// Optional base64 image snapshot attached by the raiser.
        image: Option<String>,
        /// Nearest-AED list captured at raise time (may be empty).
        nearest_aeds: Value,
        /// Requester snapshot: name, username, phone number, medical
        /// profile and skills, projected by the domain layer.
        requester: Value,
        /// Users inside the alert radius, each with their distance.
        recipients: Vec<NearbyRecipient>,
    },

    /// An emergency left the ACTIVE state: explicit cancel, supersession by
    /// a newer raise, disconnect cleanup, or auto-expiry.
    EmergencyCancelled { emergency_id: Id, owner_id: Id },

    /// The AI triage assessment (or its fallback) resolved for an
    /// emergency. Routed to the raiser and the original fan-out recipients.
    EmergencyAssessed {
        emergency_id: Id,
        owner_id: Id,
        assessment: Value,
        notify_user_ids: Vec<Id>,
    },
}

/// Trait for handling domain events.
/// Implementations can perform side effects like realtime broadcast,
/// logging, cache maintenance, etc.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent);
}

/// Publishes domain events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional
    /// handler. Store the returned publisher in your application state.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers, sequentially.
    pub async fn publish(&self, event: DomainEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, _event: &DomainEvent) {
            self.seen.lock().unwrap().push(self.label);
        }
    }

    #[tokio::test]
    async fn publish_calls_handlers_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let publisher = EventPublisher::new()
            .with_handler(Arc::new(Recorder {
                label: "first",
                seen: seen.clone(),
            }))
            .with_handler(Arc::new(Recorder {
                label: "second",
                seen: seen.clone(),
            }));

        publisher
            .publish(DomainEvent::EmergencyCancelled {
                emergency_id: Id::new_v4(),
                owner_id: Id::new_v4(),
            })
            .await;

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }
}
