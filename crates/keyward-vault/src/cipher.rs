//! AES-256-GCM key generation, encryption and decryption using `ring`.
//!
//! This is the stateless cipher layer. It holds no keys between calls.
//!
//! - **Key generation**: 256-bit keys from the system CSPRNG.
//! - **Payload encryption**: [`encrypt`] / [`decrypt`] with a fresh random
//!   96-bit nonce per call, so identical plaintexts never produce identical
//!   ciphertexts.
//! - **Envelope encryption**: [`seal_for_storage`] / [`open_from_storage`]
//!   wrap a data key under the master key, binding the key id as associated
//!   data.
//!
//! # Ciphertext layout
//!
//! ```text
//! [12 bytes: nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use ring::aead::{self, Aad, BoundKey, NONCE_LEN, Nonce, NonceSequence, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};
use crate::master::MasterKey;

/// Length of an AES-256-GCM key in bytes.
pub const KEY_LEN: usize = 32;

/// Length of the AES-256-GCM nonce in bytes (96 bits).
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// Length of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

static AEAD_ALG: &aead::Algorithm = &aead::AES_256_GCM;

/// Prefix of the associated data used for envelope encryption.
const STORAGE_AAD_PREFIX: &[u8] = b"keyward/storage/v1:";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw symmetric key material. Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Zeroizing<Vec<u8>>);

impl SymmetricKey {
    /// Wrap raw bytes. Length is checked when the key is used, not here, so a
    /// malformed key surfaces as [`VaultError::Crypto`] from the operation.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("len", &self.0.len())
            .finish_non_exhaustive()
    }
}

/// Authenticated ciphertext: nonce, encrypted bytes and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// URL-safe base64 text form, used on the command line.
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(&self.0)
    }

    /// Parse the text form produced by [`Ciphertext::to_base64`].
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Crypto`] if the text is not valid base64.
    pub fn from_base64(text: &str) -> Result<Self> {
        URL_SAFE
            .decode(text.trim())
            .map(Self)
            .map_err(|e| VaultError::crypto("decrypt", format!("ciphertext is not base64: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Nonce handling
// ---------------------------------------------------------------------------

/// A nonce sequence that yields exactly one nonce and then errors.
struct SingleNonce(Option<[u8; NONCE_LEN_BYTES]>);

impl SingleNonce {
    fn new(bytes: [u8; NONCE_LEN_BYTES]) -> Self {
        Self(Some(bytes))
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

/// Generate a fresh random 256-bit key.
///
/// # Errors
///
/// Returns [`VaultError::Crypto`] if the system CSPRNG fails.
pub fn generate_symmetric_key() -> Result<SymmetricKey> {
    let mut buf = Zeroizing::new(vec![0u8; KEY_LEN]);
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| VaultError::crypto("generate_key", "system random source failed"))?;
    Ok(SymmetricKey(buf))
}

// ---------------------------------------------------------------------------
// Payload encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key`.
///
/// # Errors
///
/// Returns [`VaultError::Crypto`] if the key is not [`KEY_LEN`] bytes or
/// `ring` reports a failure.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Ciphertext> {
    seal("encrypt", key.as_bytes(), Aad::empty(), plaintext)
}

/// Decrypt and authenticate `ciphertext` under `key`.
///
/// # Errors
///
/// Returns [`VaultError::Crypto`] if the ciphertext was tampered with,
/// truncated, or produced under a different key.
pub fn decrypt(key: &SymmetricKey, ciphertext: &Ciphertext) -> Result<Vec<u8>> {
    open("decrypt", key.as_bytes(), Aad::empty(), ciphertext.as_bytes())
}

// ---------------------------------------------------------------------------
// Envelope encryption
// ---------------------------------------------------------------------------

/// Wrap a data key under the master key for storage in the registry.
pub fn seal_for_storage(master: &MasterKey, key_id: &str, key: &SymmetricKey) -> Result<Vec<u8>> {
    let aad = storage_aad(key_id);
    seal("seal_for_storage", master.as_bytes(), Aad::from(&aad[..]), key.as_bytes())
        .map(Ciphertext::into_bytes)
}

/// Unwrap a data key previously sealed by [`seal_for_storage`] for the same
/// `key_id`.
pub fn open_from_storage(master: &MasterKey, key_id: &str, sealed: &[u8]) -> Result<SymmetricKey> {
    let aad = storage_aad(key_id);
    open("open_from_storage", master.as_bytes(), Aad::from(&aad[..]), sealed)
        .map(|bytes| SymmetricKey(Zeroizing::new(bytes)))
}

fn storage_aad(key_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(STORAGE_AAD_PREFIX.len() + key_id.len());
    aad.extend_from_slice(STORAGE_AAD_PREFIX);
    aad.extend_from_slice(key_id.as_bytes());
    aad
}

// ---------------------------------------------------------------------------
// AEAD core
// ---------------------------------------------------------------------------

fn check_key_len(operation: &'static str, key: &[u8]) -> Result<()> {
    if key.len() != KEY_LEN {
        return Err(VaultError::crypto(
            operation,
            format!("key must be {} bytes, got {}", KEY_LEN, key.len()),
        ));
    }
    Ok(())
}

fn seal<A: AsRef<[u8]>>(
    operation: &'static str,
    key: &[u8],
    aad: Aad<A>,
    plaintext: &[u8],
) -> Result<Ciphertext> {
    check_key_len(operation, key)?;

    let mut nonce_bytes = [0u8; NONCE_LEN_BYTES];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| VaultError::crypto(operation, "failed to generate random nonce"))?;

    let unbound_key = UnboundKey::new(AEAD_ALG, key)
        .map_err(|_| VaultError::crypto(operation, "failed to create AES-256-GCM key"))?;
    let mut sealing_key = SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    // `ring` encrypts in place and appends the tag; the nonce goes in front.
    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(aad, &mut in_out)
        .map_err(|_| VaultError::crypto(operation, "seal_in_place failed"))?;

    let mut out = Vec::with_capacity(NONCE_LEN_BYTES + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);

    tracing::trace!(
        operation,
        plaintext_len = plaintext.len(),
        ciphertext_len = out.len(),
        "sealed data"
    );

    Ok(Ciphertext(out))
}

fn open<A: AsRef<[u8]>>(
    operation: &'static str,
    key: &[u8],
    aad: Aad<A>,
    data: &[u8],
) -> Result<Vec<u8>> {
    check_key_len(operation, key)?;

    if data.len() < NONCE_LEN_BYTES + TAG_LEN {
        return Err(VaultError::crypto(
            operation,
            format!(
                "ciphertext truncated: {} bytes, need at least {}",
                data.len(),
                NONCE_LEN_BYTES + TAG_LEN
            ),
        ));
    }

    let (nonce_part, sealed) = data.split_at(NONCE_LEN_BYTES);
    let mut nonce = [0u8; NONCE_LEN_BYTES];
    nonce.copy_from_slice(nonce_part);

    let unbound_key = UnboundKey::new(AEAD_ALG, key)
        .map_err(|_| VaultError::crypto(operation, "failed to create AES-256-GCM key"))?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce));

    let mut in_out = Zeroizing::new(sealed.to_vec());
    let plaintext = opening_key
        .open_in_place(aad, &mut in_out)
        .map_err(|_| {
            VaultError::crypto(operation, "authentication failed: wrong key or corrupted data")
        })?;

    let result = plaintext.to_vec();

    tracing::trace!(
        operation,
        ciphertext_len = data.len(),
        plaintext_len = result.len(),
        "opened data"
    );

    Ok(result)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_full_length_and_distinct() {
        let a = generate_symmetric_key().unwrap();
        let b = generate_symmetric_key().unwrap();
        assert_eq!(a.len(), KEY_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key().unwrap();
        let ct = encrypt(&key, b"hello").unwrap();
        assert_eq!(decrypt(&key, &ct).unwrap(), b"hello");
    }

    #[test]
    fn same_plaintext_gives_different_ciphertexts() {
        let key = generate_symmetric_key().unwrap();
        let a = encrypt(&key, b"same").unwrap();
        let b = encrypt(&key, b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(decrypt(&key, &a).unwrap(), decrypt(&key, &b).unwrap());
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let k1 = generate_symmetric_key().unwrap();
        let k2 = generate_symmetric_key().unwrap();
        let ct = encrypt(&k1, b"secret data").unwrap();
        assert!(matches!(decrypt(&k2, &ct), Err(VaultError::Crypto { .. })));
    }

    #[test]
    fn decrypt_with_tampered_ciphertext_fails() {
        let key = generate_symmetric_key().unwrap();
        let mut bytes = encrypt(&key, b"secret data").unwrap().into_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let result = decrypt(&key, &Ciphertext::from_bytes(bytes));
        assert!(matches!(result, Err(VaultError::Crypto { .. })));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let key = generate_symmetric_key().unwrap();
        let bytes = encrypt(&key, b"secret data").unwrap().into_bytes();
        let short = Ciphertext::from_bytes(bytes[..NONCE_LEN_BYTES + 4].to_vec());
        assert!(matches!(decrypt(&key, &short), Err(VaultError::Crypto { .. })));
    }

    #[test]
    fn malformed_key_rejected() {
        let short = SymmetricKey::from_bytes(vec![0u8; 16]);
        assert!(matches!(
            encrypt(&short, b"test"),
            Err(VaultError::Crypto { operation: "encrypt", .. })
        ));
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = generate_symmetric_key().unwrap();
        let ct = encrypt(&key, b"").unwrap();
        assert_eq!(ct.as_bytes().len(), NONCE_LEN_BYTES + TAG_LEN);
        assert!(decrypt(&key, &ct).unwrap().is_empty());
    }

    #[test]
    fn storage_seal_is_bound_to_key_id() {
        let master = MasterKey::generate().unwrap();
        let key = generate_symmetric_key().unwrap();

        let sealed = seal_for_storage(&master, "k1", &key).unwrap();
        assert_ne!(&sealed[NONCE_LEN_BYTES..], key.as_bytes());
        assert_eq!(open_from_storage(&master, "k1", &sealed).unwrap(), key);
        assert!(open_from_storage(&master, "k2", &sealed).is_err());
    }

    #[test]
    fn base64_text_form_roundtrip() {
        let key = generate_symmetric_key().unwrap();
        let ct = encrypt(&key, b"over the wire").unwrap();
        let parsed = Ciphertext::from_base64(&ct.to_base64()).unwrap();
        assert_eq!(decrypt(&key, &parsed).unwrap(), b"over the wire");
        assert!(Ciphertext::from_base64("not base64!!").is_err());
    }

    #[test]
    fn debug_output_hides_material() {
        let key = SymmetricKey::from_bytes(vec![0xAA; KEY_LEN]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("170"));
        assert!(rendered.contains("len"));
    }
}
