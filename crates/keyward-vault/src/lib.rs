//! Local key management for keyward.
//!
//! This crate creates, rotates, revokes and uses symmetric encryption keys,
//! tracks which applications may use which keys, and records every privileged
//! operation in an append-only audit trail. Key material is stored only in
//! sealed form, AES-256-GCM encrypted under a master key supplied by the
//! environment.
//!
//! # Modules
//!
//! - [`cipher`] — AES-256-GCM key generation, payload and envelope encryption.
//! - [`vault`] — key registry: create, get, rotate, revoke.
//! - [`access`] — application → key authorization mapping.
//! - [`audit`] — audit entries, the write-only log, and its sinks.
//! - [`manager`] — the audited composition callers use.
//! - [`persist`] — pluggable registry backends (JSON file, memory).
//! - [`master`] — the master key and how it is loaded.
//! - [`config`] — TOML + environment configuration.
//! - [`error`] — unified error type.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use keyward_vault::{KeyManager, MasterKey, VaultConfig};
//!
//! # fn example() -> keyward_vault::Result<()> {
//! let config = VaultConfig::load(None)?;
//! let manager = KeyManager::open(&config, MasterKey::from_env()?)?;
//!
//! manager.create_key("billing").into_result()?;
//! manager.authorize_app("invoicer", "billing").into_result()?;
//!
//! let ct = manager.encrypt("billing", b"card 4242").into_result()?;
//! let pt = manager.decrypt("billing", &ct, Some("invoicer")).into_result()?;
//! assert_eq!(pt, b"card 4242");
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod audit;
pub mod cipher;
pub mod config;
pub mod error;
pub mod manager;
pub mod master;
pub mod persist;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use access::AccessRegistry;
pub use audit::{AuditAction, AuditEntry, AuditLog, AuditSink, Outcome};
pub use cipher::{Ciphertext, SymmetricKey};
pub use config::{AuditBackend, VaultConfig};
pub use error::{ErrorKind, Result, VaultError};
pub use manager::{Audited, KeyManager};
pub use master::MasterKey;
pub use vault::{KeyRecord, KeyVault, VaultPolicy};
