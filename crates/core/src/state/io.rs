//! # IO Utilities
//!
//! The `.scribe` runtime directory and the write-only artifact log.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::state::records::Section;

/// Get the runtime directory path (.scribe)
pub fn get_runtime_path() -> PathBuf {
    if let Ok(path) = std::env::var("SCRIBE_RUNTIME_PATH") {
        return PathBuf::from(path);
    }

    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".scribe")
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write file: {:?}", path))
}

/// Writes intermediate artifacts for inspection. Nothing reads them back, and
/// a failed write never fails the run.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: Option<PathBuf>,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// A writer that drops everything
    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    async fn write(&self, relative: impl AsRef<Path>, content: &str) {
        let Some(root) = &self.root else {
            return;
        };
        let path = root.join(relative);
        if let Err(e) = write_file(&path, content).await {
            tracing::warn!("Failed to write artifact: {}", e);
        }
    }

    pub async fn write_sections(&self, sections: &[Section]) {
        match serde_json::to_string_pretty(sections) {
            Ok(json) => self.write("sections.json", &json).await,
            Err(e) => tracing::warn!("Failed to serialize sections: {}", e),
        }
    }

    pub async fn write_section(&self, index: usize, name: &str, content: &str) {
        let file = format!("{}. {}.md", index + 1, sanitize(name));
        self.write(Path::new("section_content").join(file), content)
            .await;
    }

    pub async fn write_report(&self, report: &str) {
        self.write(Path::new("reports").join("response.md"), report)
            .await;
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
