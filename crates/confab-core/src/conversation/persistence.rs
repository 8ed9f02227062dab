use crate::constants::paths;
use crate::conversation::types::Thread;
use crate::error::{ConfabError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk layout. Generation sessions are transient and never written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub threads: Vec<Thread>,
    #[serde(default)]
    pub current_thread_id: Option<String>,
}

/// Saves the thread list as one JSON document.
#[derive(Debug, Clone)]
pub struct ThreadPersistence {
    path: PathBuf,
}

impl ThreadPersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.local/share/confab/threads.json` or the platform equivalent.
    pub fn default_path() -> Result<PathBuf> {
        let data = dirs::data_dir().ok_or_else(|| {
            ConfabError::Storage("Could not determine data directory".to_string())
        })?;
        Ok(data.join(paths::CONFIG_DIR).join(paths::THREADS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty store.
    pub fn load(&self) -> Result<PersistedState> {
        if !self.path.exists() {
            return Ok(PersistedState::default());
        }

        let contents = fs::read_to_string(&self.path).map_err(|e| {
            ConfabError::Storage(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_str(&contents).map_err(|e| {
            ConfabError::Storage(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Write through a temporary file so a crash never leaves half a document.
    pub fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ConfabError::Storage(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let contents = serde_json::to_string_pretty(state)?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, contents).map_err(|e| {
            ConfabError::Storage(format!("Failed to write temporary threads file: {}", e))
        })?;

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            ConfabError::Storage(format!("Failed to rename threads file: {}", e))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::types::ChatMessage;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let persistence = ThreadPersistence::new(dir.path().join("threads.json"));
        let state = persistence.load().unwrap();
        assert!(state.threads.is_empty());
        assert!(state.current_thread_id.is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let persistence = ThreadPersistence::new(dir.path().join("nested").join("threads.json"));

        let mut thread = Thread::new();
        thread.messages.push(ChatMessage::user("Hello"));
        let state = PersistedState {
            current_thread_id: Some(thread.id.clone()),
            threads: vec![thread.clone()],
        };
        persistence.save(&state).unwrap();

        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.threads, vec![thread.clone()]);
        assert_eq!(loaded.current_thread_id, Some(thread.id));
        assert!(!dir.path().join("nested").join("threads.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("threads.json");
        fs::write(&path, "{ not json").unwrap();
        let err = ThreadPersistence::new(path).load().unwrap_err();
        assert!(matches!(err, ConfabError::Storage(_)));
    }
}
