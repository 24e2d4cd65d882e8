use crate::extractors::RejectionType;
use crate::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
};
use domain::error::{AuthErrorKind, DomainErrorKind, InternalErrorKind};
use domain::users;
use log::*;

/// Binds the upgrade request to a user identity, or refuses the handshake.
///
/// The bearer credential is taken from the `Authorization` header when
/// present, otherwise from a `token` query parameter (browsers cannot set
/// headers on a WebSocket upgrade). Verification and the session-epoch
/// check both live in the domain layer; this extractor only translates the
/// outcome into an HTTP refusal. A refused handshake creates no connection
/// state and processes no events.
pub(crate) struct AuthenticatedUser(pub users::Model);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = RejectionType;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or((
            StatusCode::UNAUTHORIZED,
            "Access token missing".to_string(),
        ))?;

        match domain::user::authenticate_connection(state.db_conn_ref(), &state.config, &token)
            .await
        {
            Ok(user) => Ok(AuthenticatedUser(user)),
            Err(e) => {
                debug!("Refusing realtime handshake: {e}");
                Err(refusal(&e.error_kind))
            }
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }

    parts
        .uri
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(|token| token.to_string())
}

fn refusal(kind: &DomainErrorKind) -> RejectionType {
    match kind {
        DomainErrorKind::Internal(InternalErrorKind::Auth(AuthErrorKind::DeviceMismatch)) => {
            // The account logged in elsewhere after this token was minted.
            (StatusCode::UNAUTHORIZED, "DEVICE_MISMATCH".to_string())
        }
        DomainErrorKind::Internal(InternalErrorKind::Auth(AuthErrorKind::InvalidToken)) => (
            StatusCode::FORBIDDEN,
            "Invalid or expired token".to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL SERVER ERROR".to_string(),
        ),
    }
}
