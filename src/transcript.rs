use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::ChatTurn;

/// Human-readable transcript: one `User:`/`Bot:` pair per turn, blank line between turns.
pub fn render(history: &[ChatTurn]) -> String {
    history
        .iter()
        .map(|turn| format!("User: {}\nBot: {}", turn.user, turn.bot))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Persists the latest conversation; each write replaces the file.
pub struct TranscriptStore {
    path: PathBuf,
}

impl TranscriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, history: &[ChatTurn]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create transcript directory: {}", parent.display())
                })?;
            }
        }
        std::fs::write(&self.path, render(history))
            .with_context(|| format!("Failed to write transcript: {}", self.path.display()))?;
        tracing::debug!("Wrote {} turns to {}", history.len(), self.path.display());
        Ok(())
    }
}
