//! Master key used for envelope encryption of stored key material.
//!
//! The master key is supplied by the environment at startup and injected into
//! [`KeyVault`](crate::vault::KeyVault). It is never written by any store in
//! this crate; protecting it is the operator's concern.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::cipher::KEY_LEN;
use crate::error::{Result, VaultError};

/// Environment variable holding the base64-encoded master key.
pub const MASTER_KEY_ENV: &str = "KEYWARD_MASTER_KEY";

/// A 256-bit key-encryption key. Wiped from memory on drop.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// Build from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::MasterKey`] unless `bytes` is exactly
    /// [`KEY_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(VaultError::MasterKey {
                reason: format!("expected {} bytes, got {}", KEY_LEN, bytes.len()),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Parse a base64 string (standard or URL-safe alphabet, padded).
    pub fn from_base64(text: &str) -> Result<Self> {
        let text = text.trim();
        let decoded = URL_SAFE
            .decode(text)
            .or_else(|_| STANDARD.decode(text))
            .map_err(|e| VaultError::MasterKey {
                reason: format!("not valid base64: {e}"),
            })?;
        Self::from_bytes(&Zeroizing::new(decoded))
    }

    /// Read the master key from [`MASTER_KEY_ENV`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the master key through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let value = Zeroizing::new(lookup(MASTER_KEY_ENV).ok_or_else(|| VaultError::MasterKey {
            reason: format!("{MASTER_KEY_ENV} is not set"),
        })?);
        let key = Self::from_base64(&value)?;
        tracing::debug!("master key loaded from environment");
        Ok(key)
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Result<Self> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        SystemRandom::new()
            .fill(&mut key[..])
            .map_err(|_| VaultError::MasterKey {
                reason: "system random source failed".into(),
            })?;
        Ok(Self(key))
    }

    /// URL-safe base64 form, suitable for placing in [`MASTER_KEY_ENV`].
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(&self.0[..]))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_roundtrip() {
        let key = MasterKey::generate().unwrap();
        let parsed = MasterKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(key.as_bytes(), parsed.as_bytes());
    }

    #[test]
    fn accepts_standard_alphabet() {
        let raw = [0xFBu8; KEY_LEN];
        let text = STANDARD.encode(raw);
        assert!(text.contains('+') || text.contains('/'));
        assert_eq!(MasterKey::from_base64(&text).unwrap().as_bytes(), &raw);
    }

    #[test]
    fn wrong_length_rejected() {
        let text = URL_SAFE.encode([1u8; 16]);
        assert!(matches!(
            MasterKey::from_base64(&text),
            Err(VaultError::MasterKey { .. })
        ));
    }

    #[test]
    fn missing_variable_reported() {
        let result = MasterKey::from_lookup(|_| None);
        let err = result.unwrap_err();
        assert!(err.to_string().contains(MASTER_KEY_ENV));
    }

    #[test]
    fn lookup_reads_master_key_variable() {
        let encoded = URL_SAFE.encode([7u8; KEY_LEN]);
        let key = MasterKey::from_lookup(|name| {
            (name == MASTER_KEY_ENV).then(|| encoded.clone())
        })
        .unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_LEN]);
    }

    #[test]
    fn debug_is_redacted() {
        let key = MasterKey::from_bytes(&[9u8; KEY_LEN]).unwrap();
        assert_eq!(format!("{key:?}"), "MasterKey(..)");
    }
}
