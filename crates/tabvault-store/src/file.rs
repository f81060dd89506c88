//! JSON-file raw store.
//!
//! Loads the whole map into memory on open; mutations mark the store dirty
//! and `flush` writes it back atomically (temp file, then rename). Dropping a
//! dirty store flushes it on a best-effort basis.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tabvault_core::{VaultError, VaultResult};

use crate::raw::{check_quota, RawStore};

struct FileState {
    items: BTreeMap<String, String>,
    dirty: bool,
}

pub struct FileStore {
    path: PathBuf,
    quota_bytes: Option<usize>,
    state: Mutex<FileState>,
}

impl FileStore {
    /// Load or create a store at `path`. A missing file starts empty.
    pub fn open(path: &Path) -> VaultResult<Self> {
        let items = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                VaultError::Storage(format!("parsing store file {}: {e}", path.display()))
            })?
        } else {
            BTreeMap::new()
        };

        Ok(FileStore {
            path: path.to_path_buf(),
            quota_bytes: None,
            state: Mutex::new(FileState {
                items,
                dirty: false,
            }),
        })
    }

    /// Reject writes once keys + values would exceed `bytes`.
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Write pending changes to disk. No-op when nothing changed.
    pub fn flush(&self) -> VaultResult<()> {
        let mut state = self.lock();
        if !state.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&state.items)?;
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        state.dirty = false;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RawStore for FileStore {
    fn get_item(&self, key: &str) -> VaultResult<Option<String>> {
        Ok(self.lock().items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> VaultResult<()> {
        let mut state = self.lock();
        check_quota(&state.items, self.quota_bytes, key, value)?;
        state.items.insert(key.to_string(), value.to_string());
        state.dirty = true;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> VaultResult<()> {
        let mut state = self.lock();
        if state.items.remove(key).is_some() {
            state.dirty = true;
        }
        Ok(())
    }

    fn keys(&self) -> VaultResult<Vec<String>> {
        Ok(self.lock().items.keys().cloned().collect())
    }

    fn replace_item(&self, key: &str, expected: &str, value: &str) -> VaultResult<bool> {
        let mut state = self.lock();
        if state.items.get(key).map(String::as_str) != Some(expected) {
            return Ok(false);
        }
        check_quota(&state.items, self.quota_bytes, key, value)?;
        state.items.insert(key.to_string(), value.to_string());
        state.dirty = true;
        Ok(true)
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(path = %self.path.display(), "failed to flush store on drop: {e}");
        }
    }
}
