use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use ara_mail_service::config::Settings;
use ara_mail_service::sender::Mailer;
use ara_mail_service::server::{create_app, AppState};
use ara_mail_service::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Arc::new(Settings::new()?);

    // Initialize tracing
    init_tracing(&settings.log)?;
    tracing::info!(templates = %settings.templates.dir.display(), "Configuration loaded");

    // Transport verification failures stop the service here
    let mailer = Arc::new(Mailer::from_settings(&settings).await?);
    tracing::info!(transport = mailer.transport().name(), "Mailer initialized");

    // Drain the mail queue in background
    let task_handle = mailer.spawn_task();

    if settings.preview.enabled {
        let app = create_app(AppState::new(settings.clone(), mailer.clone()));

        let addr = settings.preview_addr();
        let listener = TcpListener::bind(&addr).await?;
        tracing::info!("Preview server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    task_handle.abort();
    let _ = task_handle.await;

    tracing::info!("Mail service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
