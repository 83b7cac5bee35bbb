use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

use crate::template::TemplateError;

/// Errors of the preview server, rendered as HTML pages
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Invalid fixtures for template '{template}': {source}")]
    Fixtures {
        template: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Minimal HTML escaping for error output
pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut detail = self.to_string();
        if let AppError::Template(TemplateError::InvalidMarkup { errors, .. }) = &self {
            detail = errors.join("\n");
        }

        // Always log the detailed error server-side
        tracing::error!(status = %status.as_u16(), error = %self, "Preview error");

        let body = format!(
            "<!doctype html><html><body><h1>{}</h1><pre>{}</pre></body></html>",
            status,
            escape_html(&detail)
        );

        (status, Html(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
