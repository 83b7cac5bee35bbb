//! Template source loading.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::Artifact;

/// Reads raw artifact sources of a template
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// Read the raw source of one artifact.
    ///
    /// Returns `io::ErrorKind::NotFound` when the template has no such artifact.
    async fn read(&self, template: &str, artifact: Artifact) -> io::Result<String>;
}

/// Reads templates from `<root>/<template>/<artifact file>`
#[derive(Debug, Clone)]
pub struct FsTemplateSource {
    root: PathBuf,
}

impl FsTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a template
    pub fn template_dir(&self, template: &str) -> PathBuf {
        self.root.join(template)
    }
}

#[async_trait]
impl TemplateSource for FsTemplateSource {
    async fn read(&self, template: &str, artifact: Artifact) -> io::Result<String> {
        // Template names are directory names, never paths
        if template.is_empty() || template.contains("..") || Path::new(template).is_absolute() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid template name '{}'", template),
            ));
        }

        let path = self.template_dir(template).join(artifact.file_name());
        tokio::fs::read_to_string(&path).await
    }
}
