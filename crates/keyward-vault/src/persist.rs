//! Pluggable whole-registry persistence.
//!
//! The key registry and the authorization registry are each loaded and saved
//! as a single document. [`RegistryStore`] abstracts the backend so the vault
//! can run against JSON files on disk or plain memory.
//!
//! [`JsonFileStore`] never overwrites a registry file in place: it writes a
//! sibling temporary file, syncs it, and renames it over the target, so a
//! crash mid-write leaves the previous registry intact.

use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, VaultError};

/// Load/save a whole registry document.
///
/// Implementations must be `Send + Sync`; callers serialize access to a store
/// with their own lock around each load→mutate→save cycle.
pub trait RegistryStore<T>: Send + Sync {
    /// Load the registry. A store that has never been written yields
    /// `T::default()`.
    fn load(&self) -> Result<T>;

    /// Replace the stored registry with `value`.
    fn save(&self, value: &T) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON file backend
// ---------------------------------------------------------------------------

/// Pretty-printed JSON document on disk.
pub struct JsonFileStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> RegistryStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    fn load(&self) -> Result<T> {
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)?;
                tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "loaded registry");
                Ok(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "registry file absent, starting empty");
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, value: &T) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let json = serde_json::to_vec_pretty(value)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| VaultError::Io(e.error))?;

        tracing::debug!(path = %self.path.display(), bytes = json.len(), "saved registry");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Registry held in memory. Saves clone the document.
pub struct MemoryStore<T> {
    inner: Mutex<Option<T>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RegistryStore<T> for MemoryStore<T>
where
    T: Clone + Default + Send,
{
    fn load(&self) -> Result<T> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "memory" })?;
        Ok(inner.clone().unwrap_or_default())
    }

    fn save(&self, value: &T) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "memory" })?;
        *inner = Some(value.clone());
        Ok(())
    }
}
