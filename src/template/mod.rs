//! Mail template compilation, caching and rendering.
//!
//! A template is a directory holding up to three artifacts:
//!
//! ```text
//! <root>/<name>/index.mjml     # html, MJML converted to HTML then rendered
//! <root>/<name>/text.jinja     # plain text body
//! <root>/<name>/subject.jinja  # subject line
//! ```
//!
//! Every artifact is optional. Sources are rendered with `minijinja`; the
//! context always holds `lang` and the label function `__`.
//!
//! Two cache tiers sit in front of the files:
//! - raw sources, keyed by template and artifact, shared by all languages
//! - compiled templates, keyed by template, language and enabled artifacts
//!
//! # Example
//!
//! ```ignore
//! let templater = Templater::from_dir("templates", translations, TemplaterConfig::default());
//!
//! let compiled = templater
//!     .compile("helloWorld", &TemplateOptions::default().lang("en"))
//!     .await?;
//!
//! let subject = compiled
//!     .subject
//!     .as_ref()
//!     .and_then(|s| s.render(&json!({"username": "kim"}).into()));
//! ```

mod compiled;
mod markup;
mod source;

pub use compiled::{ArtifactRenderer, CompiledTemplate, RenderedTemplate, TemplateData};
pub use markup::{MarkupConverter, Mjml};
pub use source::{FsTemplateSource, TemplateSource};

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use minijinja::{escape_formatter, AutoEscape, Environment, Output, State, Value};
use moka::sync::Cache;
use thiserror::Error;

use crate::error::escape_html;
use crate::labels::{LabelGetter, Translations};
use crate::metrics::CacheMetrics;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The html markup could not be converted.
    ///
    /// `partial` holds the text and subject rendered by the same call, when
    /// the error comes from [`Templater::render`].
    #[error("Invalid markup in template '{template}': {}", .errors.join("; "))]
    InvalidMarkup {
        template: String,
        errors: Vec<String>,
        partial: Option<Box<RenderedTemplate>>,
    },
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// One renderable piece of a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Html,
    Text,
    Subject,
}

impl Artifact {
    pub const ALL: [Artifact; 3] = [Artifact::Html, Artifact::Text, Artifact::Subject];

    /// Source file name inside the template directory
    pub fn file_name(self) -> &'static str {
        match self {
            Artifact::Html => "index.mjml",
            Artifact::Text => "text.jinja",
            Artifact::Subject => "subject.jinja",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Artifact::Html => "html",
            Artifact::Text => "text",
            Artifact::Subject => "subject",
        }
    }

    /// Name registered in the template environment.
    ///
    /// The `.html` suffix turns on HTML auto-escaping for the html artifact,
    /// see [`html_formatter`].
    fn environment_name(self, template: &str) -> String {
        match self {
            Artifact::Html => format!("{}/index.html", template),
            Artifact::Text => format!("{}/text.txt", template),
            Artifact::Subject => format!("{}/subject.txt", template),
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifacts enabled for a compile or render call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactMask {
    html: bool,
    text: bool,
    subject: bool,
}

impl ArtifactMask {
    pub const ALL: ArtifactMask = ArtifactMask {
        html: true,
        text: true,
        subject: true,
    };

    pub fn contains(&self, artifact: Artifact) -> bool {
        match artifact {
            Artifact::Html => self.html,
            Artifact::Text => self.text,
            Artifact::Subject => self.subject,
        }
    }
}

impl Default for ArtifactMask {
    fn default() -> Self {
        Self::ALL
    }
}

/// Options of a compile or render call
#[derive(Debug, Clone, Default)]
pub struct TemplateOptions {
    /// Language, defaults to the templater's default language
    pub lang: Option<String>,
    /// Label getter replacing the template's own translations
    pub labels: Option<LabelGetter>,
    pub disable_html: bool,
    pub disable_text: bool,
    pub disable_subject: bool,
}

impl TemplateOptions {
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn labels(mut self, labels: LabelGetter) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn mask(&self) -> ArtifactMask {
        ArtifactMask {
            html: !self.disable_html,
            text: !self.disable_text,
            subject: !self.disable_subject,
        }
    }
}

/// Configuration of the template cache
#[derive(Debug, Clone)]
pub struct TemplaterConfig {
    /// Language used when a call names none
    pub default_lang: String,
    /// Maximum entries per cache tier
    pub cache_capacity: u64,
}

impl Default for TemplaterConfig {
    fn default() -> Self {
        Self {
            default_lang: "en".to_string(),
            cache_capacity: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    template: String,
    artifact: Artifact,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CompiledKey {
    template: String,
    lang: String,
    mask: ArtifactMask,
}

/// Compiles and renders templates through a two-tier cache
pub struct Templater {
    source: Arc<dyn TemplateSource>,
    markup: Arc<dyn MarkupConverter>,
    translations: Arc<Translations>,
    default_lang: String,
    /// Raw sources; `None` records an absent artifact
    sources: Cache<SourceKey, Option<Arc<str>>>,
    compiled: Cache<CompiledKey, CompiledTemplate>,
}

impl Templater {
    pub fn new(
        source: Arc<dyn TemplateSource>,
        markup: Arc<dyn MarkupConverter>,
        translations: Arc<Translations>,
        config: TemplaterConfig,
    ) -> Self {
        Self {
            source,
            markup,
            translations,
            default_lang: config.default_lang,
            sources: Cache::builder().max_capacity(config.cache_capacity).build(),
            compiled: Cache::builder().max_capacity(config.cache_capacity).build(),
        }
    }

    /// Templater over a templates directory, rendering MJML
    pub fn from_dir(
        root: impl Into<PathBuf>,
        translations: Arc<Translations>,
        config: TemplaterConfig,
    ) -> Self {
        Self::new(
            Arc::new(FsTemplateSource::new(root)),
            Arc::new(Mjml::new()),
            translations,
            config,
        )
    }

    pub fn default_lang(&self) -> &str {
        &self.default_lang
    }

    pub fn translations(&self) -> &Translations {
        &self.translations
    }

    /// Label getter of a template for a language
    pub fn labels(&self, template: &str, lang: &str) -> LabelGetter {
        self.translations.getter(template, lang)
    }

    /// Compile the enabled artifacts of a template into renderers
    #[tracing::instrument(name = "templater.compile", skip(self, options), fields(lang = ?options.lang))]
    pub async fn compile(
        &self,
        name: &str,
        options: &TemplateOptions,
    ) -> TemplateResult<CompiledTemplate> {
        let (compiled, markup_errors) = self.compile_artifacts(name, options).await;

        match markup_errors {
            Some(errors) => Err(TemplateError::InvalidMarkup {
                template: name.to_string(),
                errors,
                partial: None,
            }),
            None => Ok(compiled),
        }
    }

    /// Render the enabled artifacts of a template.
    ///
    /// `data.lang` and `data.labels` win over `options.lang` and `options.labels`.
    #[tracing::instrument(name = "templater.render", skip(self, data, options))]
    pub async fn render(
        &self,
        name: &str,
        data: &TemplateData,
        options: &TemplateOptions,
    ) -> TemplateResult<RenderedTemplate> {
        let options = TemplateOptions {
            lang: data
                .effective_lang()
                .map(str::to_string)
                .or_else(|| options.lang.clone()),
            labels: data.labels.clone().or_else(|| options.labels.clone()),
            ..options.clone()
        };

        let (compiled, markup_errors) = self.compile_artifacts(name, &options).await;
        let rendered = compiled.render(data);

        match markup_errors {
            Some(errors) => Err(TemplateError::InvalidMarkup {
                template: name.to_string(),
                errors,
                partial: Some(Box::new(rendered)),
            }),
            None => Ok(rendered),
        }
    }

    /// Drop every cached source and compiled template
    pub fn clear_cache(&self) {
        self.sources.invalidate_all();
        self.compiled.invalidate_all();
    }

    async fn compile_artifacts(
        &self,
        name: &str,
        options: &TemplateOptions,
    ) -> (CompiledTemplate, Option<Vec<String>>) {
        let lang = options
            .lang
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.default_lang)
            .to_string();
        let mask = options.mask();
        let key = CompiledKey {
            template: name.to_string(),
            lang: lang.clone(),
            mask,
        };

        if let Some(compiled) = self.compiled.get(&key) {
            CacheMetrics::record_hit("compiled");
            return (Self::with_override(compiled, options), None);
        }
        CacheMetrics::record_miss("compiled");

        let labels = self.translations.getter(name, &lang);
        let mut compiled = CompiledTemplate::default();
        let mut markup_errors = None;

        for artifact in Artifact::ALL {
            if !mask.contains(artifact) {
                continue;
            }

            let Some(raw) = self.load_source(name, artifact).await else {
                continue;
            };

            let source = if artifact == Artifact::Html {
                match self.markup.to_html(&raw) {
                    Ok(html) => html,
                    Err(errors) => {
                        tracing::warn!(
                            template = %name,
                            errors = ?errors,
                            "Invalid markup in html artifact"
                        );
                        markup_errors = Some(errors);
                        continue;
                    }
                }
            } else {
                raw.to_string()
            };

            compiled.set(
                artifact,
                Self::compile_artifact(name, artifact, source, &lang, &labels),
            );
        }

        if markup_errors.is_none() {
            self.compiled.insert(key, compiled.clone());
        }

        (Self::with_override(compiled, options), markup_errors)
    }

    fn with_override(compiled: CompiledTemplate, options: &TemplateOptions) -> CompiledTemplate {
        match &options.labels {
            Some(labels) => compiled.with_labels(labels),
            None => compiled,
        }
    }

    fn compile_artifact(
        name: &str,
        artifact: Artifact,
        source: String,
        lang: &str,
        labels: &LabelGetter,
    ) -> Option<ArtifactRenderer> {
        let env_name = artifact.environment_name(name);
        let mut env = Environment::new();
        env.set_formatter(html_formatter);

        if let Err(e) = env.add_template_owned(env_name.clone(), source) {
            tracing::debug!(
                template = %name,
                artifact = %artifact,
                error = %e,
                "Failed to compile template artifact"
            );
            return None;
        }

        Some(ArtifactRenderer::new(
            Arc::new(env),
            env_name,
            artifact,
            lang.to_string(),
            labels.clone(),
        ))
    }

    async fn load_source(&self, name: &str, artifact: Artifact) -> Option<Arc<str>> {
        let key = SourceKey {
            template: name.to_string(),
            artifact,
        };

        if let Some(cached) = self.sources.get(&key) {
            CacheMetrics::record_hit("source");
            return cached;
        }
        CacheMetrics::record_miss("source");

        match self.source.read(name, artifact).await {
            Ok(raw) => {
                let raw: Arc<str> = raw.into();
                self.sources.insert(key, Some(raw.clone()));
                Some(raw)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(template = %name, artifact = %artifact, "Template artifact absent");
                self.sources.insert(key, None);
                None
            }
            Err(e) => {
                tracing::warn!(
                    template = %name,
                    artifact = %artifact,
                    error = %e,
                    "Failed to read template artifact"
                );
                None
            }
        }
    }
}

/// Auto-escaping formatter keeping `/` as is, so URLs stay readable in mail sources
fn html_formatter(
    out: &mut Output<'_>,
    state: &State<'_, '_>,
    value: &Value,
) -> Result<(), minijinja::Error> {
    use std::fmt::Write;

    match value.as_str() {
        Some(raw) if matches!(state.auto_escape(), AutoEscape::Html) && !value.is_safe() => {
            out.write_str(&escape_html(raw))?;
            Ok(())
        }
        _ => escape_formatter(out, state, value),
    }
}
