//! Application → key authorization mapping.
//!
//! Grants are pure membership: an application either may use a key or it may
//! not. Granting does not check that the key exists, so access can be set up
//! before a key is created.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, VaultError, validate_identifier};
use crate::persist::{MemoryStore, RegistryStore};

/// Persisted authorization mapping: app name → authorized key ids.
pub type Permissions = BTreeMap<String, BTreeSet<String>>;

pub struct AccessRegistry {
    store: Box<dyn RegistryStore<Permissions>>,
    lock: Mutex<()>,
}

impl AccessRegistry {
    pub fn new(store: Box<dyn RegistryStore<Permissions>>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Registry over an in-memory mapping (useful for testing).
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::<Permissions>::new()))
    }

    /// Allow `app_name` to use `key_id`. Granting twice is a no-op.
    pub fn authorize_app(&self, app_name: &str, key_id: &str) -> Result<()> {
        validate_identifier("app_name", app_name)?;
        validate_identifier("key_id", key_id)?;

        let _guard = self.acquire()?;
        let mut permissions = self.store.load()?;

        let inserted = permissions
            .entry(app_name.to_string())
            .or_default()
            .insert(key_id.to_string());

        if inserted {
            self.store.save(&permissions)?;
            tracing::info!(app_name, key_id, "authorized app");
        } else {
            tracing::debug!(app_name, key_id, "app already authorized");
        }
        Ok(())
    }

    /// Withdraw a grant made by [`authorize_app`](Self::authorize_app).
    ///
    /// Returns whether a grant was removed; removing an absent grant is not an
    /// error. An application left with no keys is dropped from the mapping.
    pub fn revoke_app_access(&self, app_name: &str, key_id: &str) -> Result<bool> {
        let _guard = self.acquire()?;
        let mut permissions = self.store.load()?;

        let Some(keys) = permissions.get_mut(app_name) else {
            return Ok(false);
        };
        if !keys.remove(key_id) {
            return Ok(false);
        }
        if keys.is_empty() {
            permissions.remove(app_name);
        }

        self.store.save(&permissions)?;
        tracing::info!(app_name, key_id, "revoked app access");
        Ok(true)
    }

    /// Whether `app_name` may use `key_id`. Unknown apps and keys are simply
    /// `false`.
    pub fn check_access(&self, app_name: &str, key_id: &str) -> Result<bool> {
        let _guard = self.acquire()?;
        let permissions = self.store.load()?;

        let allowed = permissions
            .get(app_name)
            .is_some_and(|keys| keys.contains(key_id));

        tracing::debug!(app_name, key_id, allowed, "checked access");
        Ok(allowed)
    }

    /// Key ids `app_name` is authorized for, sorted.
    pub fn authorized_keys(&self, app_name: &str) -> Result<Vec<String>> {
        let _guard = self.acquire()?;
        let permissions = self.store.load()?;
        Ok(permissions
            .get(app_name)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| VaultError::LockPoisoned {
                store: "permissions",
            })
    }
}
