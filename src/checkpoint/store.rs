//! Per-row checkpoint files.
//!
//! Each finished row is written to `{job_dir}/batches/{row_id}.json`:
//! - Files are written to a temp name and linked into place, so a reader
//!   never sees a half-written checkpoint
//! - A checkpoint is never overwritten once present
//! - Row ids partition the directory, so concurrent writers never collide

use crate::models::{AeonError, Result, RowResult};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the checkpoint subdirectory inside a job directory.
pub const BATCH_DIR: &str = "batches";

/// Durable sink for row results.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

/// Checkpoints read back from disk.
#[derive(Debug, Default)]
pub struct LoadedCheckpoints {
    pub results: Vec<RowResult>,
    /// Files that could not be read or parsed, with the reason
    pub unreadable: Vec<(PathBuf, String)>,
}

impl CheckpointStore {
    /// Create the checkpoint directory inside `job_dir`.
    pub fn create(job_dir: &Path) -> Result<Self> {
        let dir = job_dir.join(BATCH_DIR);
        fs::create_dir_all(&dir).map_err(|e| AeonError::io("creating checkpoint dir", e))?;
        Ok(Self { dir })
    }

    /// Open the checkpoint directory of an existing job.
    pub fn open(job_dir: &Path) -> Self {
        Self {
            dir: job_dir.join(BATCH_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn path_for(&self, row_id: usize) -> PathBuf {
        self.dir.join(format!("{row_id}.json"))
    }

    /// Persist one row result.
    ///
    /// The temp file is hard-linked to its final name, so an existing
    /// checkpoint is detected atomically instead of being replaced.
    pub fn write(&self, result: &RowResult) -> Result<PathBuf> {
        let path = self.path_for(result.id);
        let temp_path = self.dir.join(format!("{}.json.tmp", result.id));

        let linked = write_temp(&temp_path, result).and_then(|()| {
            fs::hard_link(&temp_path, &path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    AeonError::CheckpointExists(result.id)
                } else {
                    AeonError::io("linking checkpoint", e)
                }
            })
        });
        // The temp file is never kept, whether or not the link succeeded.
        if temp_path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        linked?;

        debug!(row_id = result.id, "Checkpoint saved");
        Ok(path)
    }

    /// Read one checkpoint.
    pub fn read(&self, row_id: usize) -> Result<RowResult> {
        read_checkpoint(&self.path_for(row_id))
    }

    /// Read every checkpoint in the directory, sorted by row id.
    ///
    /// Unreadable files are collected rather than failing the whole load.
    pub fn load_all(&self) -> Result<LoadedCheckpoints> {
        let pattern = self.dir.join("*.json");
        let pattern_str = pattern.to_string_lossy();

        let paths: Vec<PathBuf> = glob::glob(&pattern_str)
            .map_err(|e| AeonError::Internal(format!("Invalid glob pattern: {e}")))?
            .filter_map(|r| r.ok())
            .collect();

        let mut loaded = LoadedCheckpoints::default();
        for path in paths {
            match read_checkpoint(&path) {
                Ok(result) => loaded.results.push(result),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                    loaded.unreadable.push((path, e.to_string()));
                }
            }
        }
        loaded.results.sort_by_key(|r| r.id);
        Ok(loaded)
    }

    /// Delete the checkpoint directory and everything in it.
    pub fn remove(self) -> Result<()> {
        fs::remove_dir_all(&self.dir).map_err(|e| AeonError::io("removing checkpoint dir", e))?;
        info!(dir = %self.dir.display(), "Removed checkpoint directory");
        Ok(())
    }
}

fn write_temp(temp_path: &Path, result: &RowResult) -> Result<()> {
    let file = File::create(temp_path).map_err(|e| AeonError::io("creating temp checkpoint", e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, result)
        .map_err(|e| AeonError::serialization("serializing checkpoint", e))?;
    writer
        .flush()
        .map_err(|e| AeonError::io("flushing checkpoint", e))
}

fn read_checkpoint(path: &Path) -> Result<RowResult> {
    let file = File::open(path).map_err(|e| AeonError::io("opening checkpoint", e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| AeonError::ParseError(format!("Invalid checkpoint {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn result(id: usize, success: bool) -> RowResult {
        let mut r = RowResult::pending(id);
        r.success = success;
        r.response_content = json!({"label": id});
        r
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(temp_dir.path()).unwrap();

        let path = store.write(&result(7, true)).unwrap();
        assert_eq!(path, temp_dir.path().join("batches").join("7.json"));
        assert_eq!(store.read(7).unwrap(), result(7, true));

        // No temp files left behind
        assert!(!store.dir().join("7.json.tmp").exists());
    }

    #[test]
    fn test_checkpoint_is_never_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(temp_dir.path()).unwrap();

        store.write(&result(1, true)).unwrap();
        let err = store.write(&result(1, false)).unwrap_err();
        assert!(matches!(err, AeonError::CheckpointExists(1)));
        assert!(store.read(1).unwrap().success);
    }

    #[test]
    fn test_failed_write_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(temp_dir.path()).unwrap();

        store.write(&result(4, true)).unwrap();
        assert!(store.write(&result(4, false)).is_err());

        let entries: Vec<String> = fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["4.json".to_string()]);
        assert_eq!(store.load_all().unwrap().results.len(), 1);
    }

    #[test]
    fn test_load_all_sorts_and_reports_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(temp_dir.path()).unwrap();

        for id in [10, 2, 0] {
            store.write(&result(id, id != 2)).unwrap();
        }
        fs::write(store.dir().join("99.json"), "{ not json").unwrap();

        let loaded = store.load_all().unwrap();
        let ids: Vec<usize> = loaded.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 2, 10]);
        assert_eq!(loaded.unreadable.len(), 1);
        assert!(loaded.unreadable[0].0.ends_with("99.json"));
    }

    #[test]
    fn test_write_fails_without_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(&temp_dir.path().join("gone"));
        assert!(!store.exists());
        assert!(matches!(store.write(&result(0, true)), Err(AeonError::Io { .. })));
    }

    #[test]
    fn test_remove_deletes_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = CheckpointStore::create(temp_dir.path()).unwrap();
        store.write(&result(0, true)).unwrap();

        store.remove().unwrap();
        assert!(!temp_dir.path().join("batches").exists());
    }
}
