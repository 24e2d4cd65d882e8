//! Realtime WebSocket infrastructure for emergency dispatch.
//!
//! This crate provides the in-memory connection and subscription registry
//! plus the typed wire protocol used to push emergency events to responders.
//!
//! # Architecture
//!
//! - **Multiple connections per user**: a user may hold any number of live
//!   sockets; each is bound to exactly one user identity at handshake.
//! - **Triple-index registry**: O(1) lookups for connection cleanup
//!   (`connections`), user-scoped routing (`user_index`) and
//!   broadcast-subscription routing (`subscriptions`), via separate DashMap
//!   indices.
//! - **Ephemeral state**: nothing here is persisted. A restart drops every
//!   registration and clients re-subscribe on reconnect; persisted
//!   emergencies are recovered through subscribe-time resync.
//! - **Type-safe frames**: client requests and server events are strongly
//!   typed; serialization happens once, in the `Manager`, and the registry
//!   only moves finished text frames.
//!
//! # Message flow
//!
//! 1. The web layer authenticates the socket and registers it, obtaining a
//!    `ConnectionId` and handing the registry the outbound channel sender.
//! 2. A client `emergency:subscribe` adds the connection to its user's
//!    subscription bucket (lazily created). The `Subscribed::New` outcome
//!    gates resync so a repeated subscribe does not duplicate it.
//! 3. The dispatch engine publishes `DomainEvent`s; `RealtimeEventHandler`
//!    converts them into wire frames and routes them by scope.
//! 4. On socket close the web layer unregisters the connection; the
//!    registry reports whether that was the user's last live socket so the
//!    engine can run disconnect cleanup.
//!
//! # Modules
//!
//! - `connection`: `ConnectionRegistry` with the triple-index layout and a
//!   type-safe `ConnectionId`
//! - `manager`: high-level frame serialization and scope routing
//! - `message`: wire protocol types (client frames, server events, acks)
//! - `domain_event_handler`: `DomainEvent` → wire frame fan-out

pub mod connection;
pub mod domain_event_handler;
pub mod manager;
pub mod message;

pub use manager::Manager;
