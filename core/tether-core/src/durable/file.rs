//! File-backed durable store.
//!
//! All keys live in one JSON document (`~/.tether/state.json`):
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": { "tether:session-id:alice": "{...}" }
//! }
//! ```
//!
//! Every access re-reads the file so that two clients sharing it behave like
//! two tabs sharing one browser profile: last writer wins per key. Writes go
//! through a temp file + rename so a crash never leaves a partial document.
//! Empty, corrupt or version-mismatched files read as an empty store.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use super::{DurableStore, StoreKey};
use crate::error::{Result, TetherError};

const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    entries: BTreeMap<String, String>,
}

impl Default for StoreFile {
    fn default() -> Self {
        StoreFile {
            version: STORE_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: &Path) -> Self {
        FileStore {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoreFile> {
        if !self.path.exists() {
            return Ok(StoreFile::default());
        }

        let content = fs_err::read_to_string(&self.path).map_err(|err| TetherError::StoreIo {
            context: "reading state file".to_string(),
            source: err,
        })?;

        if content.trim().is_empty() {
            warn!(path = %self.path.display(), "Empty state file, treating as empty store");
            return Ok(StoreFile::default());
        }

        match serde_json::from_str::<StoreFile>(&content) {
            Ok(file) if file.version == STORE_VERSION => Ok(file),
            Ok(file) => {
                warn!(
                    path = %self.path.display(),
                    version = file.version,
                    expected = STORE_VERSION,
                    "Unsupported state file version, treating as empty store"
                );
                Ok(StoreFile::default())
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    error = %err,
                    "Failed to parse state file, treating as empty store"
                );
                Ok(StoreFile::default())
            }
        }
    }

    fn write(&self, file: &StoreFile) -> Result<()> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| TetherError::StorePath(self.path.clone()))?;
        fs_err::create_dir_all(parent_dir).map_err(|err| TetherError::StoreIo {
            context: "creating state directory".to_string(),
            source: err,
        })?;

        let content = serde_json::to_string_pretty(file).map_err(|err| TetherError::Json {
            context: "encoding state file".to_string(),
            source: err,
        })?;

        let io_err = |context: &str, source: std::io::Error| TetherError::StoreIo {
            context: context.to_string(),
            source,
        };
        let mut temp_file =
            NamedTempFile::new_in(parent_dir).map_err(|err| io_err("creating temp file", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| io_err("writing temp state file", err))?;
        temp_file
            .flush()
            .map_err(|err| io_err("flushing temp state file", err))?;
        temp_file
            .persist(&self.path)
            .map_err(|err| io_err("committing state file", err.error))?;
        Ok(())
    }

    fn mutate(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) -> Result<()> {
        let mut file = self.read()?;
        apply(&mut file.entries);
        self.write(&file)
    }
}

impl DurableStore for FileStore {
    fn get(&self, key: &StoreKey) -> Result<Option<String>> {
        Ok(self.read()?.entries.remove(key.as_str()))
    }

    fn set(&self, key: &StoreKey, value: &str) -> Result<()> {
        self.mutate(|entries| {
            entries.insert(key.as_str().to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &StoreKey) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.mutate(|entries| {
            entries.remove(key.as_str());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_across_instances() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("state.json");
        let key = StoreKey::session_id("alice");

        FileStore::new(&path).set(&key, "value").unwrap();
        assert_eq!(
            FileStore::new(&path).get(&key).unwrap().as_deref(),
            Some("value")
        );
    }

    #[test]
    fn two_handles_see_each_others_writes() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        let first = FileStore::new(&path);
        let second = FileStore::new(&path);
        let a = StoreKey::session_id("alice");
        let b = StoreKey::session_id("bob");

        first.set(&a, "a1").unwrap();
        second.set(&b, "b1").unwrap();
        first.set(&a, "a2").unwrap();

        assert_eq!(second.get(&a).unwrap().as_deref(), Some("a2"));
        assert_eq!(first.get(&b).unwrap().as_deref(), Some("b1"));

        second.remove(&a).unwrap();
        assert_eq!(first.get(&a).unwrap(), None);
    }

    #[test]
    fn corrupt_or_empty_file_reads_as_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        let store = FileStore::new(&path);
        let key = StoreKey::session_id("alice");

        fs_err::write(&path, "").unwrap();
        assert_eq!(store.get(&key).unwrap(), None);

        fs_err::write(&path, "{ definitely not json").unwrap();
        assert_eq!(store.get(&key).unwrap(), None);

        store.set(&key, "fresh").unwrap();
        assert_eq!(store.get(&key).unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn version_mismatch_reads_as_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs_err::write(
            &path,
            r#"{"version": 99, "entries": {"tether:session-id:alice": "x"}}"#,
        )
        .unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get(&StoreKey::session_id("alice")).unwrap(), None);
    }

    #[test]
    fn remove_without_file_is_noop() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        FileStore::new(&path)
            .remove(&StoreKey::session_id("alice"))
            .unwrap();
        assert!(!path.exists());
    }
}
