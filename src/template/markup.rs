//! Markup to HTML conversion for the html artifact.

use mrml::prelude::render::RenderOptions;

/// Converts a markup source into HTML.
///
/// Structural problems are reported as a list of messages.
pub trait MarkupConverter: Send + Sync {
    fn to_html(&self, source: &str) -> Result<String, Vec<String>>;
}

/// MJML markup, rendered with `mrml`
#[derive(Default)]
pub struct Mjml {
    options: RenderOptions,
}

impl Mjml {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkupConverter for Mjml {
    fn to_html(&self, source: &str) -> Result<String, Vec<String>> {
        let parsed = mrml::parse(source).map_err(|e| vec![e.to_string()])?;

        if !parsed.warnings.is_empty() {
            tracing::debug!(warnings = parsed.warnings.len(), "MJML parsed with warnings");
        }

        parsed
            .element
            .render(&self.options)
            .map_err(|e| vec![e.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renders_valid_mjml() {
        let source = "<mjml><mj-body><mj-section><mj-column>\
                      <mj-text>Hello {{ username }}</mj-text>\
                      </mj-column></mj-section></mj-body></mjml>";

        let html = Mjml::new().to_html(source).unwrap();
        assert!(html.contains("Hello {{ username }}"));
        assert!(html.contains("<html"));
    }

    #[test]
    fn test_reports_structural_errors() {
        let errors = Mjml::new().to_html("<mjml><mj-body>").unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
