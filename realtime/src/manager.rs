use crate::connection::{ConnectionId, ConnectionRegistry, Disconnected, Subscribed, UserId};
use crate::message::{EventType, ServerEvent};
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Routing scope for an outbound event. Resync pushes bypass the manager:
/// the web layer writes them straight into the subscribing connection's
/// channel.
#[derive(Debug, Clone)]
pub enum MessageScope {
    /// Every live connection of a user, subscribed or not.
    User { user_id: UserId },
    /// Every subscribed connection of a user.
    Subscribers { user_id: UserId },
    /// Every subscribed connection of every user.
    AllSubscribers,
}

/// High-level routing over the connection registry: serializes a typed
/// event once and hands the finished frame to the addressed index.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
}

impl Manager {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    /// Register a new connection and return its unique ID
    pub fn register_connection(
        &self,
        user_id: UserId,
        sender: UnboundedSender<String>,
    ) -> ConnectionId {
        let connection_id = self.registry.register(user_id, sender);
        info!("Registered realtime connection for user {user_id}");
        connection_id
    }

    /// Unregister a connection by ID, reporting whether the owning user just
    /// lost their last live connection.
    pub fn unregister_connection(&self, connection_id: &ConnectionId) -> Option<Disconnected> {
        info!("Unregistering realtime connection {}", connection_id.as_str());
        self.registry.unregister(connection_id)
    }

    /// Subscribe a connection to emergency broadcasts.
    pub fn subscribe(&self, connection_id: &ConnectionId) -> Option<Subscribed> {
        self.registry.subscribe(connection_id)
    }

    /// Unsubscribe a connection from emergency broadcasts.
    pub fn unsubscribe(&self, connection_id: &ConnectionId) {
        self.registry.unsubscribe(connection_id)
    }

    /// Serialize an event and send it to the given scope.
    pub fn send_event(&self, event: ServerEvent, scope: MessageScope) {
        let event_type = event.event_type();

        let frame = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize {event_type} event: {e}");
                return;
            }
        };

        match scope {
            MessageScope::User { user_id } => {
                self.registry.send_to_user(&user_id, &frame);
            }
            MessageScope::Subscribers { user_id } => {
                self.registry.send_to_subscribers(&user_id, &frame);
            }
            MessageScope::AllSubscribers => {
                self.registry.broadcast_subscribers(&frame);
            }
        }
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
