//! State backends.
//!
//! A backend stores the whole [`PersistedState`] of a store. Every commit
//! of a persistent store writes a complete new state, so a backend only has
//! to make `save` atomic: after a crash `load` returns either the previous
//! or the new state, never a mix.

use crate::error::{StoreError, StoreResult};
use crate::state::PersistedState;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Storage for a store's persisted state.
///
/// # Implementors
///
/// - [`MemoryBackend`] - no persistence, for tests and servers held in memory
/// - [`FileBackend`] - a single JSON file, replaced atomically
pub trait StateBackend: Send + Sync {
    /// Loads the last saved state, or `None` for a new store.
    ///
    /// # Errors
    ///
    /// Returns an error if the state exists but cannot be read or decoded.
    fn load(&self) -> StoreResult<Option<PersistedState>>;

    /// Replaces the saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state could not be made durable. The
    /// previously saved state must then still be intact.
    fn save(&mut self, state: &PersistedState) -> StoreResult<()>;

    /// Whether commits must be saved through this backend.
    fn is_persistent(&self) -> bool {
        true
    }
}

/// A backend that keeps nothing.
///
/// Stores opened on it live only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryBackend;

impl MemoryBackend {
    /// Creates a new memory backend.
    pub fn new() -> Self {
        Self
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> StoreResult<Option<PersistedState>> {
        Ok(None)
    }

    fn save(&mut self, _state: &PersistedState) -> StoreResult<()> {
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// A backend that keeps the state in one JSON file.
///
/// Saves write a sibling temporary file, sync it, rename it over the state
/// file and sync the directory. An exclusive advisory lock on a sibling
/// `.lock` file is held for the backend's lifetime.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    temp_path: PathBuf,
    _lock_file: File,
}

impl FileBackend {
    /// Opens the backend for the state file at `path`, creating parent
    /// directories as needed. The state file itself is created on first
    /// save.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the store,
    /// or an I/O error.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_path = sibling(path, "lock");
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            temp_path: sibling(path, "tmp"),
            _lock_file: lock_file,
        })
    }

    /// Returns the path of the state file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl StateBackend for FileBackend {
    fn load(&self) -> StoreResult<Option<PersistedState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut data = Vec::new();
        File::open(&self.path)?.read_to_end(&mut data)?;
        if data.is_empty() {
            return Ok(None);
        }

        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&mut self, state: &PersistedState) -> StoreResult<()> {
        let data = serde_json::to_vec(state)?;

        let mut file = File::create(&self.temp_path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.path)?;
        self.sync_directory()
    }
}

fn sibling(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::STATE_FORMAT_VERSION;
    use rowsync_protocol::{PeerId, Version};
    use tempfile::tempdir;

    fn empty_state() -> PersistedState {
        PersistedState {
            format_version: STATE_FORMAT_VERSION,
            peer_id: PeerId::from_bytes([3; 16]),
            high_version: Version::new(12),
            retained_from: Version::ZERO,
            tables: Vec::new(),
            rows: Vec::new(),
            changes: Vec::new(),
            seen: Vec::new(),
            watermarks: Vec::new(),
        }
    }

    #[test]
    fn memory_backend_is_not_persistent() {
        let mut backend = MemoryBackend::new();
        assert!(!backend.is_persistent());
        backend.save(&empty_state()).unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn file_backend_new_store_loads_nothing() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(&dir.path().join("client.json")).unwrap();
        assert!(backend.load().unwrap().is_none());
    }

    #[test]
    fn file_backend_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("client.json");

        let mut backend = FileBackend::open(&path).unwrap();
        backend.save(&empty_state()).unwrap();
        assert!(path.exists());
        assert!(!sibling(&path, "tmp").exists());

        let loaded = backend.load().unwrap().unwrap();
        assert_eq!(loaded, empty_state());
    }

    #[test]
    fn file_backend_is_exclusive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");

        let first = FileBackend::open(&path).unwrap();
        assert!(matches!(FileBackend::open(&path), Err(StoreError::Locked)));
        drop(first);
        assert!(FileBackend::open(&path).is_ok());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, b"{not json").unwrap();

        let backend = FileBackend::open(&path).unwrap();
        assert!(matches!(backend.load(), Err(StoreError::Serialization(_))));
    }
}
