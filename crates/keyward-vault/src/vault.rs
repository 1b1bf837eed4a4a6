//! Key registry: creation, retrieval, rotation and revocation.
//!
//! [`KeyVault`] owns every [`KeyRecord`]. Key material is generated by the
//! cipher layer and stored only in sealed form (see
//! [`cipher::seal_for_storage`]); the plaintext key leaves the vault solely
//! through [`KeyVault::get_key`].
//!
//! # Key states
//!
//! ```text
//! NonExistent --create--> Active --revoke--> Revoked
//!                          |  ^                 |
//!                          +--+ rotate          | rotate / create (only with reuse_revoked)
//!                          <--------------------+
//! ```
//!
//! Records are never deleted. Every mutating call runs under the vault's lock
//! as one load→mutate→save cycle.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cipher::{self, SymmetricKey};
use crate::error::{Result, VaultError, validate_identifier};
use crate::master::MasterKey;
use crate::persist::{MemoryStore, RegistryStore};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Persisted state of one key id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,

    /// Starts at 1; incremented only by rotation.
    pub version: u32,

    /// The data key sealed under the master key.
    #[serde(with = "base64_bytes")]
    pub encrypted_material: Vec<u8>,

    /// When the current version was created.
    pub created_at: DateTime<Utc>,

    /// Once true, the record cannot be used for payload cryptography.
    pub revoked: bool,
}

/// The whole key registry, keyed by key id.
pub type KeyRegistry = BTreeMap<String, KeyRecord>;

/// Behavioural switches for [`KeyVault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPolicy {
    /// Whether a revoked key id may be brought back into use, either by
    /// `create_key` (a fresh version-1 record) or by `rotate_key` (the next
    /// version). When false the id stays retired: re-creation fails with
    /// [`VaultError::DuplicateKey`] and rotation with
    /// [`VaultError::KeyRevoked`].
    pub reuse_revoked: bool,
}

impl Default for VaultPolicy {
    fn default() -> Self {
        Self {
            reuse_revoked: true,
        }
    }
}

// ---------------------------------------------------------------------------
// KeyVault
// ---------------------------------------------------------------------------

pub struct KeyVault {
    master_key: MasterKey,
    store: Box<dyn RegistryStore<KeyRegistry>>,
    policy: VaultPolicy,
    lock: Mutex<()>,
}

impl KeyVault {
    pub fn new(
        master_key: MasterKey,
        store: Box<dyn RegistryStore<KeyRegistry>>,
        policy: VaultPolicy,
    ) -> Self {
        Self {
            master_key,
            store,
            policy,
            lock: Mutex::new(()),
        }
    }

    /// Vault over an in-memory registry (useful for testing).
    pub fn in_memory(master_key: MasterKey, policy: VaultPolicy) -> Self {
        Self::new(master_key, Box::new(MemoryStore::<KeyRegistry>::new()), policy)
    }

    pub fn policy(&self) -> VaultPolicy {
        self.policy
    }

    /// Generate a new key under `key_id` and persist it as version 1.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DuplicateKey`] if a live key already uses the id,
    /// or if the id belongs to a revoked key and
    /// [`VaultPolicy::reuse_revoked`] is off.
    pub fn create_key(&self, key_id: &str) -> Result<()> {
        validate_identifier("key_id", key_id)?;
        let _guard = self.acquire()?;
        let mut registry = self.store.load()?;

        if let Some(existing) = registry.get(key_id) {
            if !existing.revoked || !self.policy.reuse_revoked {
                return Err(VaultError::DuplicateKey {
                    key_id: key_id.to_string(),
                });
            }
            tracing::info!(key_id, "reusing id of revoked key");
        }

        let record = self.fresh_record(key_id, 1)?;
        registry.insert(key_id.to_string(), record);
        self.store.save(&registry)?;

        tracing::info!(key_id, version = 1, "created key");
        Ok(())
    }

    /// Unseal and return the current key material for `key_id`.
    ///
    /// The returned key is wiped from memory when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyNotFound`] or [`VaultError::KeyRevoked`], or
    /// [`VaultError::Crypto`] if the stored material fails authentication
    /// (wrong master key or tampered registry).
    pub fn get_key(&self, key_id: &str) -> Result<SymmetricKey> {
        let _guard = self.acquire()?;
        let registry = self.store.load()?;
        let record = live_record(&registry, key_id)?;

        let key = cipher::open_from_storage(&self.master_key, key_id, &record.encrypted_material)?;
        tracing::debug!(key_id, version = record.version, "unsealed key");
        Ok(key)
    }

    /// Metadata of `key_id` without unsealing it. Revoked records are
    /// returned as-is.
    pub fn describe(&self, key_id: &str) -> Result<KeyRecord> {
        let _guard = self.acquire()?;
        let registry = self.store.load()?;
        registry
            .get(key_id)
            .cloned()
            .ok_or_else(|| VaultError::KeyNotFound {
                key_id: key_id.to_string(),
            })
    }

    /// Replace the material of `key_id` with a newly generated key.
    ///
    /// The version is incremented, the timestamp refreshed and the revoked
    /// flag cleared. The updated record is persisted before returning.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyNotFound`] if no record exists, or
    /// [`VaultError::KeyRevoked`] if the key is revoked and
    /// [`VaultPolicy::reuse_revoked`] is off.
    pub fn rotate_key(&self, key_id: &str) -> Result<u32> {
        let _guard = self.acquire()?;
        let mut registry = self.store.load()?;

        let old = registry.get(key_id).ok_or_else(|| VaultError::KeyNotFound {
            key_id: key_id.to_string(),
        })?;
        let was_revoked = old.revoked;
        if was_revoked && !self.policy.reuse_revoked {
            return Err(VaultError::KeyRevoked {
                key_id: key_id.to_string(),
            });
        }
        let version = old.version + 1;

        let record = self.fresh_record(key_id, version)?;
        registry.insert(key_id.to_string(), record);
        self.store.save(&registry)?;

        tracing::info!(key_id, version, was_revoked, "rotated key");
        Ok(version)
    }

    /// Mark `key_id` revoked. Revoking an already revoked key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::KeyNotFound`] if no record exists.
    pub fn revoke_key(&self, key_id: &str) -> Result<()> {
        let _guard = self.acquire()?;
        let mut registry = self.store.load()?;

        let record = registry
            .get_mut(key_id)
            .ok_or_else(|| VaultError::KeyNotFound {
                key_id: key_id.to_string(),
            })?;

        if record.revoked {
            tracing::debug!(key_id, "key already revoked");
            return Ok(());
        }

        record.revoked = true;
        self.store.save(&registry)?;

        tracing::info!(key_id, "revoked key");
        Ok(())
    }

    /// Ids of every record, revoked ones included, in sorted order.
    pub fn list_key_ids(&self) -> Result<Vec<String>> {
        let _guard = self.acquire()?;
        Ok(self.store.load()?.into_keys().collect())
    }

    // -- Internal helpers ---------------------------------------------------

    fn acquire(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| VaultError::LockPoisoned { store: "keys" })
    }

    fn fresh_record(&self, key_id: &str, version: u32) -> Result<KeyRecord> {
        let key = cipher::generate_symmetric_key()?;
        let encrypted_material = cipher::seal_for_storage(&self.master_key, key_id, &key)?;
        Ok(KeyRecord {
            key_id: key_id.to_string(),
            version,
            encrypted_material,
            created_at: Utc::now(),
            revoked: false,
        })
    }
}

fn live_record<'a>(registry: &'a KeyRegistry, key_id: &str) -> Result<&'a KeyRecord> {
    let record = registry.get(key_id).ok_or_else(|| VaultError::KeyNotFound {
        key_id: key_id.to_string(),
    })?;
    if record.revoked {
        return Err(VaultError::KeyRevoked {
            key_id: key_id.to_string(),
        });
    }
    Ok(record)
}

// ---------------------------------------------------------------------------
// Serde helper: bytes as base64 text
// ---------------------------------------------------------------------------

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
