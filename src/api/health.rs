//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::dispatch::DispatchStatsSnapshot;
use crate::server::AppState;
use crate::transport::TransportState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue: QueueHealthResponse,
    pub transport: TransportHealthResponse,
    pub dispatch: DispatchStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_mails: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransportHealthResponse {
    pub kind: String,
    pub pooled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<TransportState>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mailer = &state.mailer;

    let queue = match mailer.queue() {
        Some(queue) => match queue.total().await {
            Ok(total) => QueueHealthResponse {
                enabled: true,
                backend: Some(queue.backend_name().to_string()),
                total_mails: Some(total),
                error: None,
            },
            Err(e) => QueueHealthResponse {
                enabled: true,
                backend: Some(queue.backend_name().to_string()),
                total_mails: None,
                error: Some(e.to_string()),
            },
        },
        None => QueueHealthResponse {
            enabled: false,
            backend: None,
            total_mails: None,
            error: None,
        },
    };

    let status = if queue.error.is_some() { "degraded" } else { "healthy" };
    let transport = mailer.transport();

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        queue,
        transport: TransportHealthResponse {
            kind: transport.name().to_string(),
            pooled: transport.state().is_some(),
            state: transport.state(),
        },
        dispatch: mailer.dispatch_stats(),
    })
}
