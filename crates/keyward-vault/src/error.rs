//! Vault error types.
//!
//! Every public API in this crate returns [`VaultError`]. Variants carry the
//! operation and key id involved so a caller can diagnose a failure, but they
//! never carry key material. Use [`VaultError::kind`] to branch on the kind of
//! failure instead of matching on display strings.

/// Unified error type for the keyward vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Key lifecycle ------------------------------------------------------
    /// A live (non-revoked) key with this id already exists.
    #[error("key already exists: key_id={key_id}")]
    DuplicateKey { key_id: String },

    /// No key has ever been created under this id.
    #[error("key not found: key_id={key_id}")]
    KeyNotFound { key_id: String },

    /// The key exists but has been revoked and can no longer be used.
    #[error("key is revoked: key_id={key_id}")]
    KeyRevoked { key_id: String },

    // -- Authorization ------------------------------------------------------
    /// The application is not authorized to use the key.
    #[error("access denied: app={app_name} cannot use key_id={key_id}")]
    AccessDenied { app_name: String, key_id: String },

    /// An application or key identifier was empty or otherwise unusable.
    #[error("invalid {field}: {reason}")]
    InvalidIdentifier { field: &'static str, reason: String },

    // -- Crypto -------------------------------------------------------------
    /// Authenticated encryption or decryption failed (malformed key, wrong
    /// key, tampered or truncated ciphertext, RNG failure).
    #[error("{operation} failed: {reason}")]
    Crypto {
        operation: &'static str,
        reason: String,
    },

    /// The master key is missing from the environment or malformed.
    #[error("master key unavailable: {reason}")]
    MasterKey { reason: String },

    // -- Audit --------------------------------------------------------------
    /// The audit trail could not be written. `operation_succeeded` reports
    /// the outcome of the operation being audited; when that operation failed
    /// too, its error is kept as the source.
    #[error(
        "audit write failed for action={action} key_id={key_id:?} \
         (operation succeeded: {operation_succeeded}): {reason}"
    )]
    AuditWrite {
        action: String,
        key_id: String,
        reason: String,
        operation_succeeded: bool,
        #[source]
        operation_error: Option<Box<VaultError>>,
    },

    // -- Configuration and storage -------------------------------------------
    /// Configuration could not be read or parsed.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// A store lock was poisoned by a panicking writer.
    #[error("lock poisoned for store: {store}")]
    LockPoisoned { store: &'static str },

    /// SQLite error from `rusqlite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fieldless discriminant of [`VaultError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateKey,
    KeyNotFound,
    KeyRevoked,
    AccessDenied,
    InvalidIdentifier,
    Crypto,
    MasterKey,
    AuditWrite,
    Config,
    Storage,
}

impl VaultError {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DuplicateKey { .. } => ErrorKind::DuplicateKey,
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::KeyRevoked { .. } => ErrorKind::KeyRevoked,
            Self::AccessDenied { .. } => ErrorKind::AccessDenied,
            Self::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            Self::Crypto { .. } => ErrorKind::Crypto,
            Self::MasterKey { .. } => ErrorKind::MasterKey,
            Self::AuditWrite { .. } => ErrorKind::AuditWrite,
            Self::Config { .. } => ErrorKind::Config,
            Self::LockPoisoned { .. }
            | Self::Database(_)
            | Self::Serialization(_)
            | Self::Io(_) => ErrorKind::Storage,
        }
    }

    /// The audited operation's own error carried by an
    /// [`AuditWrite`](Self::AuditWrite), if any.
    pub fn operation_error(&self) -> Option<&VaultError> {
        match self {
            Self::AuditWrite {
                operation_error, ..
            } => operation_error.as_deref(),
            _ => None,
        }
    }

    pub(crate) fn crypto(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Crypto {
            operation,
            reason: reason.into(),
        }
    }
}

/// Reject empty or whitespace-bearing identifiers.
///
/// Identifiers are written into single-line audit records and used as map
/// keys, so embedded whitespace or separators would make records ambiguous.
pub(crate) fn validate_identifier(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(VaultError::InvalidIdentifier {
            field,
            reason: "must not be empty".into(),
        });
    }
    if value.chars().any(|c| c.is_whitespace() || c == '|') {
        return Err(VaultError::InvalidIdentifier {
            field,
            reason: format!("{value:?} contains whitespace or '|'"),
        });
    }
    Ok(())
}

/// Convenience alias used throughout the vault crate.
pub type Result<T> = std::result::Result<T, VaultError>;
