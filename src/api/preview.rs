//! Template preview endpoints.

use std::path::Path;

use axum::{
    extract::{Path as UrlPath, Query, State},
    response::Html,
};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{escape_html, AppError, Result};
use crate::server::AppState;
use crate::template::{TemplateData, TemplateOptions};

const FIXTURES_FILE: &str = "fixtures.json";

#[derive(Debug, Default, Deserialize)]
pub struct PreviewQuery {
    pub lang: Option<String>,
}

/// GET / - list the templates of the templates directory
pub async fn list_templates(State(state): State<AppState>) -> Result<Html<String>> {
    let names = template_names(&state.settings.templates.dir).await?;

    let items: String = names
        .iter()
        .map(|name| {
            let name = escape_html(name);
            format!("<li><a href=\"/preview/{name}\">{name}</a></li>")
        })
        .collect();

    Ok(Html(format!(
        "<!doctype html><html><body><h1>Templates</h1><ul>{items}</ul></body></html>"
    )))
}

/// GET /preview/{template}?lang= - render a template with its fixtures
pub async fn preview_template(
    State(state): State<AppState>,
    UrlPath(template): UrlPath<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Html<String>> {
    let root = &state.settings.templates.dir;
    if !is_template_name(&template) {
        return Err(AppError::NotFound(format!("template '{template}'")));
    }

    let is_dir = tokio::fs::metadata(root.join(&template))
        .await
        .is_ok_and(|m| m.is_dir());
    if !is_dir {
        return Err(AppError::NotFound(format!("template '{template}'")));
    }

    let templater = state.mailer.templater();
    // Sources are edited while previewing
    templater.clear_cache();

    let mut values = load_fixtures(root, &template).await?;
    for (key, value) in &state.mailer.defaults().data {
        values.insert(key.clone(), value.clone());
    }

    let mut data = TemplateData::new(values);
    let mut options = TemplateOptions::default();
    if let Some(lang) = query.lang.as_deref().filter(|l| !l.is_empty()) {
        data = data.lang(lang);
        options = options.lang(lang);
    }

    let rendered = templater.render(&template, &data, &options).await?;

    let languages = templater.translations().languages(&template);
    let html = rendered.html.unwrap_or_default();

    Ok(Html(inject_after_body(&html, &language_switcher(&template, &languages))))
}

/// A single directory name below the templates root
fn is_template_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

async fn template_names(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

/// Fixtures of a template; a missing file yields no values
async fn load_fixtures(root: &Path, template: &str) -> Result<Map<String, Value>> {
    let raw = match tokio::fs::read_to_string(root.join(template).join(FIXTURES_FILE)).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(e.into()),
    };

    serde_json::from_str(&raw).map_err(|source| AppError::Fixtures {
        template: template.to_string(),
        source,
    })
}

/// Links to every language of the template; nothing for a single language
fn language_switcher(template: &str, languages: &[String]) -> String {
    if languages.len() < 2 {
        return String::new();
    }

    let template = escape_html(template);
    let links: Vec<String> = languages
        .iter()
        .map(|lang| {
            let lang = escape_html(lang);
            format!("<a href=\"/preview/{template}?lang={lang}\">{lang}</a>")
        })
        .collect();

    format!(
        "<div style=\"padding:8px;font-family:sans-serif\">{}</div>",
        links.join(" | ")
    )
}

/// Insert `fragment` right after the opening body tag, or prepend it
fn inject_after_body(html: &str, fragment: &str) -> String {
    let position = html
        .find("<body")
        .and_then(|start| html[start..].find('>').map(|end| start + end + 1));

    match position {
        Some(at) => format!("{}{}{}", &html[..at], fragment, &html[at..]),
        None => format!("{fragment}{html}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_after_body_with_attributes() {
        let html = "<html><body style=\"margin:0\"><p>hi</p></body></html>";
        assert_eq!(
            inject_after_body(html, "<nav/>"),
            "<html><body style=\"margin:0\"><nav/><p>hi</p></body></html>"
        );
    }

    #[test]
    fn test_inject_without_body_prepends() {
        assert_eq!(inject_after_body("<p>hi</p>", "<nav/>"), "<nav/><p>hi</p>");
    }

    #[test]
    fn test_template_name_stays_below_root() {
        assert!(is_template_name("helloWorld-i18n"));
        assert!(!is_template_name(""));
        assert!(!is_template_name("/etc"));
        assert!(!is_template_name("..\\secrets"));
        assert!(!is_template_name("a/../b"));
        assert!(!is_template_name(".."));
    }

    #[test]
    fn test_language_switcher() {
        assert_eq!(language_switcher("hello", &[]), "");
        assert_eq!(language_switcher("hello", &["en".to_string()]), "");

        let switcher = language_switcher("hello", &["en".to_string(), "fr".to_string()]);
        assert!(switcher.contains("<a href=\"/preview/hello?lang=en\">en</a>"));
        assert!(switcher.contains("<a href=\"/preview/hello?lang=fr\">fr</a>"));
    }

    #[tokio::test]
    async fn test_load_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("hello")).unwrap();

        assert!(load_fixtures(dir.path(), "hello").await.unwrap().is_empty());

        std::fs::write(dir.path().join("hello").join(FIXTURES_FILE), r#"{"name":"Ada"}"#).unwrap();
        let fixtures = load_fixtures(dir.path(), "hello").await.unwrap();
        assert_eq!(fixtures["name"], "Ada");

        std::fs::write(dir.path().join("hello").join(FIXTURES_FILE), "not json").unwrap();
        assert!(matches!(
            load_fixtures(dir.path(), "hello").await,
            Err(AppError::Fixtures { .. })
        ));
    }
}
