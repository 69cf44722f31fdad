//! Template loading from disk or memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::template::PromptTemplate;
use crate::error::TemplateError;

/// Source of named prompt templates.
#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Loads and parses the template called `name`.
    async fn load(&self, name: &str) -> Result<PromptTemplate, TemplateError>;
}

/// Loads templates from files under a prompts directory.
#[derive(Debug, Clone)]
pub struct FsTemplateLoader {
    root: PathBuf,
}

impl FsTemplateLoader {
    /// Creates a loader rooted at `root` (e.g. `./prompts`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory templates are read from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TemplateLoader for FsTemplateLoader {
    async fn load(&self, name: &str) -> Result<PromptTemplate, TemplateError> {
        let path = self.root.join(name);
        let source = match fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TemplateError::NotFound(path.display().to_string()));
            }
            Err(source) => {
                return Err(TemplateError::Io {
                    name: name.to_string(),
                    source,
                });
            }
        };

        tracing::debug!(template = name, path = %path.display(), "Loaded prompt template");
        PromptTemplate::parse(name, &source)
    }
}

/// In-memory template set, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct StaticTemplates {
    sources: HashMap<String, String>,
}

impl StaticTemplates {
    /// Creates an empty template set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a template source under `name`.
    pub fn with_template(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(name.into(), source.into());
        self
    }
}

#[async_trait]
impl TemplateLoader for StaticTemplates {
    async fn load(&self, name: &str) -> Result<PromptTemplate, TemplateError> {
        let source = self
            .sources
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;
        PromptTemplate::parse(name, source)
    }
}
