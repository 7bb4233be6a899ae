use crate::APP_USER_AGENT;
use axum::response::IntoResponse;

// Undocumented banner so a bare `curl /` identifies the service.
pub async fn root() -> impl IntoResponse {
    APP_USER_AGENT
}
