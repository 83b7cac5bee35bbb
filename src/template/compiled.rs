use std::collections::BTreeMap;
use std::sync::Arc;

use minijinja::Environment;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::labels::LabelGetter;

use super::Artifact;

/// Data a template is rendered with.
///
/// `lang` and `labels` take precedence over the values captured at compile
/// time, so one compiled template can serve recipients in several languages.
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    pub values: Map<String, Value>,
    pub lang: Option<String>,
    pub labels: Option<LabelGetter>,
}

impl TemplateData {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values,
            lang: None,
            labels: None,
        }
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    pub fn labels(mut self, labels: LabelGetter) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Explicit language, else a string `lang` entry of the values
    pub fn effective_lang(&self) -> Option<&str> {
        self.lang
            .as_deref()
            .or_else(|| self.values.get("lang").and_then(Value::as_str))
            .filter(|l| !l.is_empty())
    }
}

impl From<Value> for TemplateData {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(values) => Self::new(values),
            _ => Self::default(),
        }
    }
}

impl From<Map<String, Value>> for TemplateData {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}

/// Renders one compiled artifact of a template
#[derive(Clone)]
pub struct ArtifactRenderer {
    env: Arc<Environment<'static>>,
    name: String,
    artifact: Artifact,
    lang: String,
    labels: LabelGetter,
}

impl ArtifactRenderer {
    pub(crate) fn new(
        env: Arc<Environment<'static>>,
        name: String,
        artifact: Artifact,
        lang: String,
        labels: LabelGetter,
    ) -> Self {
        Self {
            env,
            name,
            artifact,
            lang,
            labels,
        }
    }

    pub fn artifact(&self) -> Artifact {
        self.artifact
    }

    /// Render with `data`; evaluation errors are logged and yield `None`
    pub fn render(&self, data: &TemplateData) -> Option<String> {
        let lang = data.effective_lang().unwrap_or(self.lang.as_str());
        let labels = data.labels.as_ref().unwrap_or(&self.labels);

        let mut context: BTreeMap<String, minijinja::Value> = data
            .values
            .iter()
            .map(|(key, value)| (key.clone(), minijinja::Value::from_serialize(value)))
            .collect();
        context.insert("lang".to_string(), minijinja::Value::from(lang));
        context.insert("__".to_string(), labels.to_template_value());

        let rendered = self
            .env
            .get_template(&self.name)
            .and_then(|template| template.render(context));

        match rendered {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::debug!(
                    template = %self.name,
                    artifact = %self.artifact,
                    error = %e,
                    "Failed to render template artifact"
                );
                None
            }
        }
    }

    fn with_labels(&self, labels: LabelGetter) -> Self {
        Self {
            labels,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for ArtifactRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactRenderer")
            .field("name", &self.name)
            .field("artifact", &self.artifact)
            .field("lang", &self.lang)
            .finish_non_exhaustive()
    }
}

/// Up to three renderers, one per enabled and present artifact
#[derive(Debug, Clone, Default)]
pub struct CompiledTemplate {
    pub html: Option<ArtifactRenderer>,
    pub text: Option<ArtifactRenderer>,
    pub subject: Option<ArtifactRenderer>,
}

impl CompiledTemplate {
    pub fn get(&self, artifact: Artifact) -> Option<&ArtifactRenderer> {
        match artifact {
            Artifact::Html => self.html.as_ref(),
            Artifact::Text => self.text.as_ref(),
            Artifact::Subject => self.subject.as_ref(),
        }
    }

    pub(crate) fn set(&mut self, artifact: Artifact, renderer: Option<ArtifactRenderer>) {
        match artifact {
            Artifact::Html => self.html = renderer,
            Artifact::Text => self.text = renderer,
            Artifact::Subject => self.subject = renderer,
        }
    }

    /// Render every present artifact
    pub fn render(&self, data: &TemplateData) -> RenderedTemplate {
        RenderedTemplate {
            html: self.html.as_ref().and_then(|r| r.render(data)),
            text: self.text.as_ref().and_then(|r| r.render(data)),
            subject: self.subject.as_ref().and_then(|r| r.render(data)),
        }
    }

    /// Same renderers with another default label getter
    pub fn with_labels(&self, labels: &LabelGetter) -> Self {
        Self {
            html: self.html.as_ref().map(|r| r.with_labels(labels.clone())),
            text: self.text.as_ref().map(|r| r.with_labels(labels.clone())),
            subject: self.subject.as_ref().map(|r| r.with_labels(labels.clone())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_none() && self.text.is_none() && self.subject.is_none()
    }
}

/// Rendered artifacts; absent or disabled artifacts are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderedTemplate {
    pub html: Option<String>,
    pub text: Option<String>,
    pub subject: Option<String>,
}
