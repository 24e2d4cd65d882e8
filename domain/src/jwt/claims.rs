//! Claims carried by the access tokens presented at the realtime handshake.
//!
//! Tokens are minted by the external login service; this module only ever
//! decodes them. Beyond the standard registered claims, the `session` claim
//! carries the session epoch (unix seconds of the bearer's most recent
//! login) that single-active-device enforcement compares against the value
//! on record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// The user id, as a UUID string.
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    /// Session epoch: unix seconds of the most recent login.
    pub session: i64,
}
