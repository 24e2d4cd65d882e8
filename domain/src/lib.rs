//! Business logic for the ResQ dispatch core.
//!
//! This crate re-exports various items from the `entity_api` crate so that
//! consumers (`web`) do not need to depend on `entity_api` directly: `web`
//! depends on `domain`, `domain` on `entity_api`, `entity_api` on `entity`.
//! Each layer translates the lower layer's errors into its own error kinds.

// Re-exports from `entity` crate via `entity_api`
pub use entity_api::{emergencies, users, Id};

pub mod emergency;
pub mod error;
pub mod gateway;
pub mod geo;
pub mod jwt;
pub mod user;
