//! API layer - HTTP endpoint handlers of the preview server.

mod health;
mod metrics;
mod preview;
mod routes;

pub use health::{health, HealthResponse};
pub use metrics::prometheus_metrics;
pub use preview::{list_templates, preview_template, PreviewQuery};
pub use routes::api_routes;
