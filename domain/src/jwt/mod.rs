//! Access-token verification for the realtime handshake.
//!
//! Signature and expiry are checked here; the session-epoch comparison that
//! completes single-active-device enforcement lives in
//! [`crate::user::authenticate_connection`], which owns the database lookup.

use crate::error::Error;
use jsonwebtoken::{decode, DecodingKey, Validation};
use log::*;
use service::config::Config;

pub use claims::AccessTokenClaims;

pub mod claims;

/// Verifies the bearer token's signature and expiry and returns its claims.
///
/// Any decoding failure (bad signature, malformed token, expired `exp`)
/// surfaces as an `InvalidToken` auth error; the caller refuses the
/// handshake without creating any connection state.
pub fn verify_access_token(config: &Config, token: &str) -> Result<AccessTokenClaims, Error> {
    let secret = config.access_token_secret().ok_or_else(|| {
        warn!("No access token secret configured; refusing all connections");
        Error::config("access token secret is not configured")
    })?;

    let token_data = decode::<AccessTokenClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorKind, DomainErrorKind, InternalErrorKind};
    use clap::Parser;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn config_with_secret(secret: &str) -> Config {
        Config::parse_from(["resq_platform_rs"]).set_access_token_secret(secret.to_string())
    }

    fn mint(secret: &str, claims: &AccessTokenClaims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_expiring_in(secs: i64) -> AccessTokenClaims {
        let now = chrono::Utc::now().timestamp();
        AccessTokenClaims {
            sub: uuid::Uuid::new_v4().to_string(),
            exp: (now + secs) as usize,
            iat: now as usize,
            session: now,
        }
    }

    #[test]
    fn verify_round_trips_valid_claims() {
        let config = config_with_secret("s3cret");
        let claims = claims_expiring_in(1800);

        let decoded = verify_access_token(&config, &mint("s3cret", &claims)).unwrap();

        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.session, claims.session);
    }

    #[test]
    fn verify_rejects_a_token_signed_with_another_secret() {
        let config = config_with_secret("s3cret");
        let token = mint("other", &claims_expiring_in(1800));

        let err = verify_access_token(&config, &token).unwrap_err();

        assert_eq!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Auth(AuthErrorKind::InvalidToken))
        );
    }

    #[test]
    fn verify_rejects_an_expired_token() {
        let config = config_with_secret("s3cret");
        // Far enough in the past to clear jsonwebtoken's default leeway.
        let token = mint("s3cret", &claims_expiring_in(-300));

        assert!(verify_access_token(&config, &token).is_err());
    }

    #[test]
    fn verify_without_a_configured_secret_is_a_config_error() {
        let config = Config::parse_from(["resq_platform_rs"]);
        let err = verify_access_token(&config, "anything").unwrap_err();

        assert!(matches!(
            err.error_kind,
            DomainErrorKind::Internal(InternalErrorKind::Config(_))
        ));
    }
}
