use super::{metadata, publisher, server::AppState};
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/publish", post(publisher::publish_message))
        .route("/health", get(metadata::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
