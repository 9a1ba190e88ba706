//! Local mirror of the collection, read at startup before the network answers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::Collection;
use crate::types::{Checklist, ChecklistId};

pub const CACHE_KEY: &str = "list_data";

pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("packadive")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedCollection {
    pub checklists: Vec<Checklist>,
    #[serde(default)]
    pub active: Option<ChecklistId>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_data_dir() -> Self {
        Self::new(get_data_dir().join(format!("{CACHE_KEY}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Best-effort read. A missing or unreadable cache is an empty one.
    pub fn load(&self) -> Option<CachedCollection> {
        if !self.path.exists() {
            return None;
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) => {
                warn!("failed to read list cache '{}': {}", self.path.display(), error);
                return None;
            }
        };

        match serde_json::from_str::<CachedCollection>(&contents) {
            Ok(cached) => Some(cached),
            Err(error) => {
                warn!("failed to parse list cache '{}': {}", self.path.display(), error);
                None
            }
        }
    }

    pub fn load_collection(&self) -> (Collection, Option<ChecklistId>) {
        match self.load() {
            Some(cached) => (Collection::new(cached.checklists), cached.active),
            None => (Collection::default(), None),
        }
    }

    pub fn save(&self, collection: &Collection, active: Option<&ChecklistId>) -> Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("invalid list cache path"))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory '{}'", parent.display()))?;

        let cached = CachedCollection {
            checklists: collection.checklists().to_vec(),
            active: active.cloned(),
            saved_at: Utc::now(),
        };
        let contents =
            serde_json::to_string_pretty(&cached).context("failed to serialize list cache")?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| anyhow!("invalid list cache file name"))?
            .to_string_lossy()
            .to_string();
        let tmp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        fs::write(&tmp_path, contents).with_context(|| {
            format!("failed to write temporary cache file '{}'", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!(
                "failed to atomically rename cache file '{}' to '{}'",
                tmp_path.display(),
                self.path.display()
            )
        })?;

        Ok(())
    }
}
