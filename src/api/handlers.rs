use crate::api::AppState;
use crate::persistence::Query;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

pub const MESSAGING_UNAVAILABLE: &str = "Messaging queue is not available.";
pub const DB_UNAVAILABLE: &str = "DB is not available.";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
    pub environment: String,
}

fn unavailable(message: &'static str) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": message })),
    )
        .into_response()
}

/// Health check: the broker must be ready and the store must answer.
///
/// Readiness is read without waiting, so a check racing a reconnect can
/// report the broker as down.
pub async fn health_check(State(state): State<AppState>) -> axum::response::Response {
    if let Some(connection) = &state.connection {
        if !connection.is_ready() {
            tracing::warn!(endpoint = connection.endpoint(), state = %connection.state(), "Health check: broker not ready");
            return unavailable(MESSAGING_UNAVAILABLE);
        }
    }

    if let Some(store) = &state.store {
        if let Err(e) = store.count(&Query::all()).await {
            tracing::warn!(error = %e, "Health check: store unavailable");
            return unavailable(DB_UNAVAILABLE);
        }
    }

    Json(HealthResponse {
        status: "RUNNING",
        name: state.service.name.clone(),
        version: state.service.version.clone(),
        environment: state.service.environment.clone(),
    })
    .into_response()
}

/// Prometheus text exposition of the default registry
pub async fn metrics() -> (StatusCode, String) {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, String::from("# Error encoding metrics\n"));
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!("Failed to convert metrics to string: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, String::from("# Error converting metrics\n"))
        }
    }
}
