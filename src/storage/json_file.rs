//! File-per-key JSON store
//!
//! Each key lives in `<data_dir>/<key>.json`. Writes go to a temp file first and are
//! renamed into place, so a crash never leaves a half-written record behind.
//!
//! ## Concurrency Safety
//! Mutations take an exclusive fs2 lock on `store.lock` so two processes sharing the
//! data directory cannot interleave writes.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{KeyValueStore, StorageError};

const RECORD_EXTENSION: &str = "json";
const LOCK_FILENAME: &str = "store.lock";

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("Invalid storage key: {:?}", key),
            )));
        }
        Ok(self.dir.join(format!("{}.{}", key, RECORD_EXTENSION)))
    }

    /// Acquire the store-wide lock.
    /// The returned File must be kept alive while holding the lock.
    fn acquire_lock(&self) -> Result<File, StorageError> {
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.dir.join(LOCK_FILENAME))?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.record_path(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        let _lock = self.acquire_lock()?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, value)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.record_path(key)?;
        let _lock = self.acquire_lock()?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<(), StorageError> {
        let _lock = self.acquire_lock()?;

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path
                .extension()
                .map(|ext| ext == RECORD_EXTENSION || ext == "tmp")
                .unwrap_or(false);
            if is_record {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_set_get_remove() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();

        assert!(store.get("vip_tutor_usage").unwrap().is_none());
        store.set("vip_tutor_usage", r#"{"date":"2025-03-02"}"#).unwrap();
        assert_eq!(
            store.get("vip_tutor_usage").unwrap().as_deref(),
            Some(r#"{"date":"2025-03-02"}"#)
        );

        store.remove("vip_tutor_usage").unwrap();
        assert!(store.get("vip_tutor_usage").unwrap().is_none());
        // Removing twice is fine
        store.remove("vip_tutor_usage").unwrap();
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        JsonFileStore::open(dir.path())
            .unwrap()
            .set("vip_tutor_profile", "{}")
            .unwrap();

        let reopened = JsonFileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("vip_tutor_profile").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_clear_removes_all_records() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        store.set("vip_tutor_profile", "{}").unwrap();
        store.set("vip_tutor_sessions", "[]").unwrap();

        store.clear().unwrap();
        assert!(store.get("vip_tutor_profile").unwrap().is_none());
        assert!(store.get("vip_tutor_sessions").unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).unwrap();
        assert!(store.set("../escape", "{}").is_err());
        assert!(store.get("").is_err());
    }
}
