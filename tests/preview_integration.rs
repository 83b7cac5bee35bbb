//! Preview server tests against the bundled templates

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use ara_mail_service::config::Settings;
use ara_mail_service::labels::Translations;
use ara_mail_service::sender::Mailer;
use ara_mail_service::server::{create_app, AppState};
use ara_mail_service::template::{Templater, TemplaterConfig};
use ara_mail_service::transport::{JsonTransport, MailTransport};

fn create_state() -> AppState {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));

    let mut settings = Settings::default();
    settings.templates.dir = root.join("templates");
    settings.defaults.data.insert("domain".to_string(), json!("https://example.org"));
    // Wins over the fixture value
    settings.defaults.data.insert("username".to_string(), json!("Default"));

    let translations = Translations::from_file(root.join("config/translations.json")).unwrap();
    let templater = Templater::from_dir(
        settings.templates.dir.clone(),
        Arc::new(translations),
        TemplaterConfig::default(),
    );

    let mailer = Mailer::new(
        Arc::new(templater),
        MailTransport::simple(Arc::new(JsonTransport::new())),
        None,
        settings.defaults.clone(),
    );

    AppState::new(Arc::new(settings), Arc::new(mailer))
}

async fn get(uri: &str) -> (StatusCode, String) {
    let app = create_app(create_state());
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_index_lists_templates() {
    let (status, body) = get("/").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<a href=\"/preview/helloWorld\">helloWorld</a>"));
    assert!(body.contains("<a href=\"/preview/helloWorld-i18n\">helloWorld-i18n</a>"));
}

#[tokio::test]
async fn test_preview_merges_defaults_over_fixtures() {
    let (status, body) = get("/preview/helloWorld").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Hello Default!"));
    assert!(body.contains("href=\"https://example.org\""));
    // No labels for this template, so no switcher
    assert!(!body.contains("?lang="));
}

#[tokio::test]
async fn test_preview_language_switcher() {
    let (status, body) = get("/preview/helloWorld-i18n?lang=fr").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Salut Default"));
    assert!(body.contains("href=\"/preview/helloWorld-i18n?lang=en\""));
    assert!(body.contains("href=\"/preview/helloWorld-i18n?lang=fr\""));
}

#[tokio::test]
async fn test_preview_unknown_template() {
    let (status, body) = get("/preview/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("template &#39;missing&#39;"));
}

#[tokio::test]
async fn test_preview_rejects_absolute_name() {
    let (status, _) = get("/preview/%2Fetc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_transport() {
    let (status, body) = get("/health").await;
    assert_eq!(status, StatusCode::OK);

    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["transport"]["kind"], "json");
    assert_eq!(health["transport"]["pooled"], false);
    assert_eq!(health["queue"]["enabled"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (status, _) = get("/metrics").await;
    assert_eq!(status, StatusCode::OK);
}
