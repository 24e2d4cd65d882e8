use dashmap::DashMap;
use log::*;
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;

/// User identity, shared with the events crate (entity ids are UUIDs).
pub type UserId = events::Id;

/// A finished, serialized text frame ready to be written to a socket.
pub type Frame = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection information held in the primary index.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    pub sender: UnboundedSender<Frame>,
}

/// Outcome of a subscribe call. `New` gates subscribe-time resync: a second
/// subscribe from the same connection must not replay in-flight emergencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscribed {
    New,
    Already,
}

/// What `unregister` learned while tearing a connection down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    pub user_id: UserId,
    /// True when this was the user's last live connection; the dispatch
    /// engine runs disconnect cleanup exactly on this edge.
    pub last_connection: bool,
}

/// Connection registry with three indices for O(1) routing:
/// every live socket, the sockets per user, and the subscribed sockets per
/// user. All state is in-memory and rebuilt by client resubscription after
/// a restart.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, ConnectionInfo>,

    /// Secondary index: every live connection per user - O(1)
    user_index: DashMap<UserId, HashSet<ConnectionId>>,

    /// Tertiary index: connections that asked for emergency broadcasts,
    /// lazily created on first subscribe - O(1)
    subscriptions: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    /// Register a new connection - O(1)
    pub fn register(&self, user_id: UserId, sender: UnboundedSender<Frame>) -> ConnectionId {
        let connection_id = ConnectionId::new();

        self.connections
            .insert(connection_id.clone(), ConnectionInfo { user_id, sender });

        self.user_index
            .entry(user_id)
            .or_default()
            .insert(connection_id.clone());

        connection_id
    }

    /// Unregister a connection, dropping any subscription it held - O(1).
    /// Returns `None` for an id that was never registered (or already
    /// unregistered).
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Disconnected> {
        let (_, info) = self.connections.remove(connection_id)?;
        let user_id = info.user_id;

        self.remove_from_index(&self.subscriptions, &user_id, connection_id);
        let last_connection = self.remove_from_index(&self.user_index, &user_id, connection_id);

        Some(Disconnected {
            user_id,
            last_connection,
        })
    }

    /// Add the connection to its user's subscription bucket - O(1).
    /// Returns `None` for an unknown connection id.
    pub fn subscribe(&self, connection_id: &ConnectionId) -> Option<Subscribed> {
        let user_id = self.connections.get(connection_id)?.user_id;

        let newly_added = self
            .subscriptions
            .entry(user_id)
            .or_default()
            .insert(connection_id.clone());

        Some(if newly_added {
            Subscribed::New
        } else {
            Subscribed::Already
        })
    }

    /// Remove the connection from its user's subscription bucket - O(1).
    pub fn unsubscribe(&self, connection_id: &ConnectionId) {
        if let Some(info) = self.connections.get(connection_id) {
            let user_id = info.user_id;
            drop(info); // Release the shard lock before touching another map
            self.remove_from_index(&self.subscriptions, &user_id, connection_id);
        }
    }

    /// Send a frame to one connection - O(1).
    pub fn send_to_connection(&self, connection_id: &ConnectionId, frame: Frame) {
        if let Some(info) = self.connections.get(connection_id) {
            if let Err(e) = info.sender.send(frame) {
                warn!(
                    "Failed to send frame to connection {}: {}. Connection will be cleaned up.",
                    connection_id.as_str(),
                    e
                );
            }
        }
    }

    /// Send a frame to every live connection of a user - O(k).
    pub fn send_to_user(&self, user_id: &UserId, frame: &Frame) {
        self.send_via_index(&self.user_index, user_id, frame);
    }

    /// Send a frame to every *subscribed* connection of a user - O(k).
    pub fn send_to_subscribers(&self, user_id: &UserId, frame: &Frame) {
        self.send_via_index(&self.subscriptions, user_id, frame);
    }

    /// Send a frame to every subscribed connection of every user - O(n).
    pub fn broadcast_subscribers(&self, frame: &Frame) {
        for entry in self.subscriptions.iter() {
            for conn_id in entry.value().iter() {
                self.send_to_connection(conn_id, frame.clone());
            }
        }
    }

    /// Number of live connections a user currently holds.
    pub fn connection_count(&self, user_id: &UserId) -> usize {
        self.user_index
            .get(user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// True when the user has at least one subscribed connection.
    pub fn has_subscribers(&self, user_id: &UserId) -> bool {
        self.subscriptions
            .get(user_id)
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }

    fn send_via_index(
        &self,
        index: &DashMap<UserId, HashSet<ConnectionId>>,
        user_id: &UserId,
        frame: &Frame,
    ) {
        if let Some(connection_ids) = index.get(user_id) {
            for conn_id in connection_ids.iter() {
                self.send_to_connection(conn_id, frame.clone());
            }
        }
    }

    /// Remove one connection from a user's bucket in the given index,
    /// dropping the bucket once empty. Returns true when the bucket emptied.
    fn remove_from_index(
        &self,
        index: &DashMap<UserId, HashSet<ConnectionId>>,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) -> bool {
        if let Some(mut entry) = index.get_mut(user_id) {
            entry.remove(connection_id);

            if entry.is_empty() {
                drop(entry); // Release lock before removal
                index.remove(user_id);
                return true;
            }
            return false;
        }
        // No bucket at all: treat as "nothing left", which only matters for
        // user_index where registration guarantees a bucket exists.
        true
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn channel() -> (
        UnboundedSender<Frame>,
        tokio::sync::mpsc::UnboundedReceiver<Frame>,
    ) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn subscribe_reports_new_then_already() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new_v4();
        let (tx, _rx) = channel();

        let conn = registry.register(user, tx);

        assert_eq!(registry.subscribe(&conn), Some(Subscribed::New));
        assert_eq!(registry.subscribe(&conn), Some(Subscribed::Already));
    }

    #[test]
    fn subscribe_on_an_unknown_connection_is_rejected() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.subscribe(&ConnectionId::new()), None);
    }

    #[test]
    fn unregister_reports_the_last_connection_edge() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new_v4();
        let (tx_a, _rx_a) = channel();
        let (tx_b, _rx_b) = channel();

        let conn_a = registry.register(user, tx_a);
        let conn_b = registry.register(user, tx_b);

        let first = registry.unregister(&conn_a).unwrap();
        assert!(!first.last_connection);

        let second = registry.unregister(&conn_b).unwrap();
        assert!(second.last_connection);

        // A double unregister finds nothing to tear down.
        assert_eq!(registry.unregister(&conn_b), None);
    }

    #[test]
    fn send_to_subscribers_reaches_only_subscribed_connections() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new_v4();
        let (tx_sub, mut rx_sub) = channel();
        let (tx_plain, mut rx_plain) = channel();

        let conn_sub = registry.register(user, tx_sub);
        let _conn_plain = registry.register(user, tx_plain);
        registry.subscribe(&conn_sub);

        registry.send_to_subscribers(&user, &"frame".to_string());

        assert_eq!(rx_sub.try_recv().unwrap(), "frame");
        assert!(rx_plain.try_recv().is_err());
    }

    #[test]
    fn send_to_user_reaches_every_live_connection() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new_v4();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        registry.register(user, tx_a);
        registry.register(user, tx_b);

        registry.send_to_user(&user, &"frame".to_string());

        assert_eq!(rx_a.try_recv().unwrap(), "frame");
        assert_eq!(rx_b.try_recv().unwrap(), "frame");
    }

    #[test]
    fn unsubscribe_stops_delivery_without_dropping_the_connection() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new_v4();
        let (tx, mut rx) = channel();

        let conn = registry.register(user, tx);
        registry.subscribe(&conn);
        registry.unsubscribe(&conn);

        registry.send_to_subscribers(&user, &"frame".to_string());
        assert!(rx.try_recv().is_err());

        registry.send_to_user(&user, &"direct".to_string());
        assert_eq!(rx.try_recv().unwrap(), "direct");
    }

    #[test]
    fn broadcast_subscribers_spans_users() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();

        let conn_a = registry.register(UserId::new_v4(), tx_a);
        let conn_b = registry.register(UserId::new_v4(), tx_b);
        registry.subscribe(&conn_a);
        registry.subscribe(&conn_b);

        registry.broadcast_subscribers(&"frame".to_string());

        assert_eq!(rx_a.try_recv().unwrap(), "frame");
        assert_eq!(rx_b.try_recv().unwrap(), "frame");
    }

    #[test]
    fn unregister_also_clears_the_subscription() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new_v4();
        let (tx, _rx) = channel();

        let conn = registry.register(user, tx);
        registry.subscribe(&conn);
        registry.unregister(&conn);

        assert!(!registry.has_subscribers(&user));
        assert_eq!(registry.connection_count(&user), 0);
    }
}
