use axum::{routing::get, Router};

use crate::server::AppState;

use super::health::health;
use super::metrics::prometheus_metrics;
use super::preview::{list_templates, preview_template};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Template preview
        .route("/", get(list_templates))
        .route("/preview/{template}", get(preview_template))
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
}
