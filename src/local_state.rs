use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::document::DocumentId;

const STATE_FILE: &str = "last_state.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    last_document_id: Option<DocumentId>,
}

/// Small per-user state kept outside any document: which top-level
/// document was open last.
#[derive(Debug, Clone)]
pub struct LocalState {
    path: PathBuf,
}

impl LocalState {
    /// State file in the platform config directory.
    pub fn in_config_dir() -> Result<Self> {
        let project_dirs = ProjectDirs::from("", "", "kmap")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(Self::at(project_dirs.config_dir().join(STATE_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file just means nothing was opened before.
    pub fn last_document(&self) -> Option<DocumentId> {
        let raw = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str::<StateFile>(&raw)
            .ok()
            .and_then(|state| state.last_document_id)
    }

    pub fn remember(&self, id: &DocumentId) -> Result<()> {
        self.write(&StateFile {
            last_document_id: Some(id.clone()),
        })
    }

    pub fn forget(&self) -> Result<()> {
        self.write(&StateFile::default())
    }

    fn write(&self, state: &StateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let json = serde_json::to_string_pretty(state).context("Failed to serialize local state")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}
