use axum::http::StatusCode;
use axum::response::IntoResponse;

/// GET liveness probe; answers as long as the router is serving.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "healthy")
}
