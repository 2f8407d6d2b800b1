use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::WorkflowState;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint at {path} is not valid state: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Workflow state persisted as a single JSON document.
///
/// Saves go to a sibling temp file first and are renamed into place, so a
/// crash mid-write never leaves a truncated checkpoint.
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn save(&self, state: &WorkflowState) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(state).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        tracing::debug!(path = %self.path.display(), iteration = state.iteration, "Checkpoint saved");
        Ok(())
    }

    pub fn load(&self) -> Result<WorkflowState, CheckpointError> {
        let bytes = fs::read(&self.path).map_err(|source| CheckpointError::Io {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| CheckpointError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReviewStatus;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let checkpoint = FileCheckpoint::new(dir.path().join("nested/run.json"));
        assert!(!checkpoint.exists());

        let mut state = WorkflowState::new("task", 4);
        state.iteration = 2;
        state.artifact = "draft".into();
        state.status = ReviewStatus::NeedsRevision;

        checkpoint.save(&state).unwrap();
        assert!(checkpoint.exists());
        assert_eq!(checkpoint.load().unwrap(), state);
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        fs::write(&path, "{ not json").unwrap();

        let err = FileCheckpoint::new(&path).load().unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = FileCheckpoint::new(dir.path().join("absent.json"))
            .load()
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Io { .. }));
    }
}
