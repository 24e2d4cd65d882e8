//! WebSocket controller for the web layer.
//!
//! This module contains only the Axum handler and per-connection loop for
//! the realtime channel. The registry, routing and wire-protocol types live
//! in the `realtime` crate to avoid circular dependencies.

pub(crate) mod handler;
