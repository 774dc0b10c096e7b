use crate::api::{handlers, AppState};
use crate::logging::RequestLogLayer;
use axum::{routing::get, Router};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    let request_logger = state.request_logger.clone();
    let prometheus_enabled = state.prometheus_enabled;

    let mut router = Router::new()
        .route("/health-check", get(handlers::health_check))
        .route("/:service/api/health-check", get(handlers::health_check));

    if prometheus_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    let mut router = router.with_state(state);

    if let Some(logger) = request_logger {
        router = router.layer(RequestLogLayer::new(logger));
    }

    router
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
