use crate::notification::{self, Envelope};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::{
    Router,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{error, info};

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn receive_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    info!("Receiving notification");

    let envelope: Envelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Failed to decode body: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "unable to decode body");
        }
    };

    match notification::process(&state.reconciler, &envelope).await {
        Ok(summary) => {
            info!(
                "Notification handled: {} deployed, {} already current, {} ignored",
                summary.deployed, summary.current, summary.ignored
            );
            (StatusCode::OK, "")
        }
        Err(e) => {
            error!("Unable to deploy target: {:?}", anyhow::Error::from(e));
            (StatusCode::INTERNAL_SERVER_ERROR, "unable to deploy target")
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/notification", post(receive_notification))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(state)
}
