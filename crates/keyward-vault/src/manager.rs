//! Audited composition of the vault, access registry and audit log.
//!
//! [`KeyManager`] is what callers (the CLI, batch runner, embedding
//! applications) use. Each operation consults the components in turn and then
//! attempts exactly one audit record, whatever the outcome. The result comes
//! back as an [`Audited`] value holding the operation outcome and the audit
//! outcome side by side.
//!
//! Identifiers are validated before anything else runs, so a rejected
//! `key_id` or `app_name` still yields a single audit record for the attempt.

use crate::access::{AccessRegistry, Permissions};
use crate::audit::{AuditAction, AuditLog, AuditSink, FileAuditSink, SqliteAuditSink};
use crate::cipher::{self, Ciphertext, SymmetricKey};
use crate::config::{AuditBackend, VaultConfig};
use crate::error::{Result, VaultError, validate_identifier};
use crate::master::MasterKey;
use crate::persist::JsonFileStore;
use crate::vault::{KeyRegistry, KeyVault};

/// An operation outcome together with the outcome of auditing it.
#[derive(Debug)]
#[must_use = "an audit failure is only reported through this value"]
pub struct Audited<T> {
    pub outcome: Result<T>,
    pub audit: Result<()>,
}

impl<T> Audited<T> {
    /// Fold both outcomes into one result.
    ///
    /// An audit failure takes precedence: the caller gets
    /// [`VaultError::AuditWrite`], whose `operation_succeeded` field still
    /// reports how the operation itself went. If the operation failed as
    /// well, its error is attached as the audit error's source.
    pub fn into_result(self) -> Result<T> {
        match (self.audit, self.outcome) {
            (Ok(()), outcome) => outcome,
            (
                Err(VaultError::AuditWrite {
                    action,
                    key_id,
                    reason,
                    operation_succeeded,
                    operation_error: None,
                }),
                Err(primary),
            ) => Err(VaultError::AuditWrite {
                action,
                key_id,
                reason,
                operation_succeeded,
                operation_error: Some(Box::new(primary)),
            }),
            (Err(audit_err), _) => Err(audit_err),
        }
    }

    pub fn is_audited(&self) -> bool {
        self.audit.is_ok()
    }
}

pub struct KeyManager {
    vault: KeyVault,
    access: AccessRegistry,
    audit: AuditLog,
}

impl KeyManager {
    pub fn new(vault: KeyVault, access: AccessRegistry, audit: AuditLog) -> Self {
        Self {
            vault,
            access,
            audit,
        }
    }

    /// Wire file-backed registries and the configured audit sink.
    ///
    /// Each store is guarded by an in-process lock only. Two managers (or two
    /// `keyward` processes) opened on the same `data_dir` at once are not
    /// coordinated, and concurrent writes from them can lose updates; share
    /// one `KeyManager` across threads instead.
    pub fn open(config: &VaultConfig, master_key: MasterKey) -> Result<Self> {
        let vault = KeyVault::new(
            master_key,
            Box::new(JsonFileStore::<KeyRegistry>::new(config.keys_path())),
            config.policy(),
        );
        let access = AccessRegistry::new(Box::new(JsonFileStore::<Permissions>::new(
            config.permissions_path(),
        )));

        let audit_path = config.audit_path();
        let sink: Box<dyn AuditSink> = match config.audit.backend {
            AuditBackend::File => Box::new(FileAuditSink::open(&audit_path)?),
            AuditBackend::Sqlite => Box::new(SqliteAuditSink::open(&audit_path)?),
        };

        tracing::info!(
            data_dir = %config.data_dir.display(),
            audit_backend = ?config.audit.backend,
            reuse_revoked = config.reuse_revoked,
            "key manager ready"
        );

        Ok(Self::new(vault, access, AuditLog::new(sink)))
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    pub fn access(&self) -> &AccessRegistry {
        &self.access
    }

    // -- Key lifecycle ------------------------------------------------------

    pub fn create_key(&self, key_id: &str) -> Audited<()> {
        let outcome =
            check_identifiers(key_id, None).and_then(|()| self.vault.create_key(key_id));
        self.finish(AuditAction::Generate, key_id, None, outcome)
    }

    /// Plaintext key material; the caller should drop it promptly.
    pub fn get_key(&self, key_id: &str) -> Audited<SymmetricKey> {
        let outcome =
            check_identifiers(key_id, None).and_then(|()| self.vault.get_key(key_id));
        self.finish(AuditAction::GetKey, key_id, None, outcome)
    }

    /// Returns the new version number.
    pub fn rotate_key(&self, key_id: &str) -> Audited<u32> {
        let outcome =
            check_identifiers(key_id, None).and_then(|()| self.vault.rotate_key(key_id));
        self.finish(AuditAction::Rotate, key_id, None, outcome)
    }

    pub fn revoke_key(&self, key_id: &str) -> Audited<()> {
        let outcome =
            check_identifiers(key_id, None).and_then(|()| self.vault.revoke_key(key_id));
        self.finish(AuditAction::Revoke, key_id, None, outcome)
    }

    // -- Authorization ------------------------------------------------------

    pub fn authorize_app(&self, app_name: &str, key_id: &str) -> Audited<()> {
        let outcome = check_identifiers(key_id, Some(app_name))
            .and_then(|()| self.access.authorize_app(app_name, key_id));
        self.finish(AuditAction::Authorize, key_id, Some(app_name), outcome)
    }

    /// Withdraw a grant. Returns whether one existed.
    pub fn revoke_app_access(&self, app_name: &str, key_id: &str) -> Audited<bool> {
        let outcome = check_identifiers(key_id, Some(app_name))
            .and_then(|()| self.access.revoke_app_access(app_name, key_id));
        self.finish(AuditAction::RevokeAccess, key_id, Some(app_name), outcome)
    }

    /// A `false` answer is audited as denied.
    pub fn check_access(&self, app_name: &str, key_id: &str) -> Audited<bool> {
        let outcome = check_identifiers(key_id, Some(app_name))
            .and_then(|()| self.access.check_access(app_name, key_id));
        let granted = matches!(outcome, Ok(true));
        let audit = self
            .audit
            .record(AuditAction::CheckAccess, key_id, Some(app_name), granted);
        Audited { outcome, audit }
    }

    // -- Payload cryptography ------------------------------------------------

    pub fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Audited<Ciphertext> {
        let outcome = check_identifiers(key_id, None)
            .and_then(|()| self.vault.get_key(key_id))
            .and_then(|key| cipher::encrypt(&key, plaintext));
        self.finish(AuditAction::Encrypt, key_id, None, outcome)
    }

    /// Decrypt payload data under `key_id`.
    ///
    /// When `app_name` is given, the app must be authorized for the key; an
    /// unauthorized app gets [`VaultError::AccessDenied`] and the key is never
    /// unsealed.
    pub fn decrypt(
        &self,
        key_id: &str,
        ciphertext: &Ciphertext,
        app_name: Option<&str>,
    ) -> Audited<Vec<u8>> {
        let outcome = check_identifiers(key_id, app_name)
            .and_then(|()| self.authorize_decrypt(key_id, app_name))
            .and_then(|()| {
                let key = self.vault.get_key(key_id)?;
                cipher::decrypt(&key, ciphertext)
            });
        self.finish(AuditAction::Decrypt, key_id, app_name, outcome)
    }

    fn authorize_decrypt(&self, key_id: &str, app_name: Option<&str>) -> Result<()> {
        let Some(app_name) = app_name else {
            return Ok(());
        };
        if self.access.check_access(app_name, key_id)? {
            return Ok(());
        }
        tracing::warn!(app_name, key_id, "decrypt denied: app not authorized");
        Err(VaultError::AccessDenied {
            app_name: app_name.to_string(),
            key_id: key_id.to_string(),
        })
    }

    fn finish<T>(
        &self,
        action: AuditAction,
        key_id: &str,
        app_name: Option<&str>,
        outcome: Result<T>,
    ) -> Audited<T> {
        if let Err(e) = &outcome {
            tracing::debug!(action = %action, key_id, error = %e, "operation failed");
        }
        let audit = self.audit.record(action, key_id, app_name, outcome.is_ok());
        Audited { outcome, audit }
    }
}

fn check_identifiers(key_id: &str, app_name: Option<&str>) -> Result<()> {
    validate_identifier("key_id", key_id)?;
    if let Some(app_name) = app_name {
        validate_identifier("app_name", app_name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audit::{AuditEntry, MemoryAuditSink, Outcome};
    use crate::error::ErrorKind;
    use crate::vault::VaultPolicy;

    fn test_manager() -> (KeyManager, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        let manager = KeyManager::new(
            KeyVault::in_memory(MasterKey::generate().unwrap(), VaultPolicy::default()),
            AccessRegistry::in_memory(),
            AuditLog::new(Box::new(sink.clone())),
        );
        (manager, sink)
    }

    fn last(sink: &MemoryAuditSink) -> AuditEntry {
        sink.entries().pop().unwrap()
    }

    struct BrokenSink;

    impl AuditSink for BrokenSink {
        fn append(&self, _entry: &AuditEntry) -> Result<()> {
            Err(std::io::Error::other("read-only filesystem").into())
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (manager, _) = test_manager();
        manager.create_key("k1").into_result().unwrap();

        let ct = manager.encrypt("k1", b"hello").into_result().unwrap();
        let pt = manager.decrypt("k1", &ct, None).into_result().unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn every_call_writes_one_entry() {
        let (manager, sink) = test_manager();

        let _ = manager.create_key("k1");
        let _ = manager.create_key("k1"); // duplicate
        let _ = manager.get_key("k1");
        let _ = manager.rotate_key("missing");
        let _ = manager.authorize_app("app1", "k1");
        let _ = manager.check_access("app2", "k1");
        let _ = manager.revoke_key("k1");

        let entries = sink.entries();
        let summary: Vec<(AuditAction, Outcome)> =
            entries.iter().map(|e| (e.action, e.outcome)).collect();
        assert_eq!(
            summary,
            vec![
                (AuditAction::Generate, Outcome::Success),
                (AuditAction::Generate, Outcome::Denied),
                (AuditAction::GetKey, Outcome::Success),
                (AuditAction::Rotate, Outcome::Denied),
                (AuditAction::Authorize, Outcome::Success),
                (AuditAction::CheckAccess, Outcome::Denied),
                (AuditAction::Revoke, Outcome::Success),
            ]
        );
    }

    #[test]
    fn unauthorized_app_is_denied_without_plaintext() {
        let (manager, sink) = test_manager();
        manager.create_key("k1").into_result().unwrap();
        manager.authorize_app("app1", "k1").into_result().unwrap();
        let ct = manager.encrypt("k1", b"secret").into_result().unwrap();

        let denied = manager.decrypt("k1", &ct, Some("app2")).into_result();
        match denied {
            Err(err) => assert_eq!(err.kind(), ErrorKind::AccessDenied),
            Ok(_) => panic!("unauthorized app received plaintext"),
        }
        let entry = last(&sink);
        assert_eq!(entry.action, AuditAction::Decrypt);
        assert_eq!(entry.app_name.as_deref(), Some("app2"));
        assert_eq!(entry.outcome, Outcome::Denied);

        let allowed = manager.decrypt("k1", &ct, Some("app1")).into_result();
        assert_eq!(allowed.unwrap(), b"secret");
        assert_eq!(last(&sink).outcome, Outcome::Success);
    }

    #[test]
    fn denial_differs_from_missing_key() {
        let (manager, _) = test_manager();
        let ct = Ciphertext::from_bytes(vec![0u8; 40]);

        let missing = manager.decrypt("nope", &ct, None).into_result().unwrap_err();
        let denied = manager
            .decrypt("nope", &ct, Some("app1"))
            .into_result()
            .unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::KeyNotFound);
        assert_eq!(denied.kind(), ErrorKind::AccessDenied);
    }

    #[test]
    fn revoked_key_refuses_payload_operations() {
        let (manager, sink) = test_manager();
        manager.create_key("k1").into_result().unwrap();
        let ct = manager.encrypt("k1", b"data").into_result().unwrap();
        manager.revoke_key("k1").into_result().unwrap();

        let enc = manager.encrypt("k1", b"more").into_result().unwrap_err();
        let dec = manager.decrypt("k1", &ct, None).into_result().unwrap_err();
        assert_eq!(enc.kind(), ErrorKind::KeyRevoked);
        assert_eq!(dec.kind(), ErrorKind::KeyRevoked);
        assert_eq!(last(&sink).outcome, Outcome::Denied);
    }

    #[test]
    fn old_ciphertext_fails_after_rotation() {
        let (manager, _) = test_manager();
        manager.create_key("k1").into_result().unwrap();
        let ct = manager.encrypt("k1", b"v1 data").into_result().unwrap();

        assert_eq!(manager.rotate_key("k1").into_result().unwrap(), 2);
        let err = manager.decrypt("k1", &ct, None).into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn audit_failure_surfaces_even_on_success() {
        let manager = KeyManager::new(
            KeyVault::in_memory(MasterKey::generate().unwrap(), VaultPolicy::default()),
            AccessRegistry::in_memory(),
            AuditLog::new(Box::new(BrokenSink)),
        );

        let result = manager.create_key("k1");
        assert!(result.outcome.is_ok());
        assert!(!result.is_audited());
        assert!(matches!(
            result.into_result(),
            Err(VaultError::AuditWrite {
                operation_succeeded: true,
                ..
            })
        ));

        // The primary failure is still visible next to the audit failure.
        let dup = manager.create_key("k1");
        assert!(matches!(dup.outcome, Err(VaultError::DuplicateKey { .. })));
        assert!(matches!(
            dup.audit,
            Err(VaultError::AuditWrite {
                operation_succeeded: false,
                ..
            })
        ));
    }

    #[test]
    fn audit_failure_keeps_the_operation_error() {
        let manager = KeyManager::new(
            KeyVault::in_memory(MasterKey::generate().unwrap(), VaultPolicy::default()),
            AccessRegistry::in_memory(),
            AuditLog::new(Box::new(BrokenSink)),
        );
        let _ = manager.create_key("k1");
        let ct = manager.encrypt("k1", b"secret").outcome.unwrap();

        let err = manager
            .decrypt("k1", &ct, Some("intruder"))
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuditWrite);
        assert_eq!(
            err.operation_error().map(VaultError::kind),
            Some(ErrorKind::AccessDenied)
        );
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("access denied"));

        // A successful operation has nothing to attach.
        let succeeded = manager.get_key("k1").into_result().unwrap_err();
        assert_eq!(succeeded.kind(), ErrorKind::AuditWrite);
        assert!(succeeded.operation_error().is_none());
    }

    #[test]
    fn invalid_identifiers_are_rejected_and_audited_once() {
        let (manager, sink) = test_manager();
        manager.create_key("k1").into_result().unwrap();
        let ct = manager.encrypt("k1", b"data").into_result().unwrap();

        let forged = "ghost | None | DENIED\n2020-01-01 00:00:00 | revoke | k1";
        let results = [
            manager.get_key(forged).into_result().map(drop),
            manager.rotate_key(forged).into_result().map(drop),
            manager.revoke_key(forged).into_result(),
            manager.revoke_app_access("app|x", "k1").into_result().map(drop),
            manager.check_access("app\nx", "k1").into_result().map(drop),
            manager.encrypt("k1\n", b"data").into_result().map(drop),
            manager.decrypt("k1", &ct, Some("app | x")).into_result().map(drop),
        ];
        for result in results {
            assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidIdentifier);
        }

        let entries = sink.entries();
        assert_eq!(entries.len(), 2 + 7);
        assert!(entries[2..].iter().all(|e| e.outcome == Outcome::Denied));
        assert_eq!(entries[4].action, AuditAction::Revoke);
        assert_eq!(entries[4].key_id, forged);

        // The key the forged id tried to name was never touched.
        assert!(!manager.vault().describe("k1").unwrap().revoked);
    }

    #[test]
    fn revoke_access_is_audited() {
        let (manager, sink) = test_manager();
        manager.authorize_app("app1", "k1").into_result().unwrap();
        assert!(manager.revoke_app_access("app1", "k1").into_result().unwrap());
        assert!(!manager.check_access("app1", "k1").into_result().unwrap());

        let actions: Vec<AuditAction> = sink.entries().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Authorize,
                AuditAction::RevokeAccess,
                AuditAction::CheckAccess
            ]
        );
    }
}
