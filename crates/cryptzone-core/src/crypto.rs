//! Cryptographic primitives for `cryptzone`.
//!
//! Provides AES-GCM authenticated encryption with 128- or 256-bit keys,
//! HKDF-SHA256 key derivation, and a zeroize-on-drop key newtype. The cipher
//! variant is chosen by key length, so a zone created with a 128-bit key
//! encrypts with AES-128-GCM.
//!
//! - Every encryption generates a fresh 96-bit nonce via `OsRng`.
//! - Ciphertext format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! - Per-file keys are derived from a zone key with HKDF and a per-file `info`.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Minimum ciphertext length: 12-byte nonce + 16-byte AES-GCM tag.
const MIN_CIPHERTEXT_LEN: usize = 12 + 16;

/// Nonce length for AES-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// A 128- or 256-bit encryption key that is zeroized on drop.
///
/// The inner bytes are never exposed in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedKeyLength`] unless `bytes` is 16 or
    /// 32 bytes long.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        match bytes.len() {
            16 | 32 => Ok(Self(bytes)),
            n => Err(CryptoError::UnsupportedKeyLength {
                bits: n.saturating_mul(8),
            }),
        }
    }

    /// Generate a new random key of `bits` length using the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedKeyLength`] unless `bits` is 128 or 256.
    pub fn generate(bits: u32) -> Result<Self, CryptoError> {
        let bytes = match bits {
            128 => Aes128Gcm::generate_key(OsRng).to_vec(),
            256 => Aes256Gcm::generate_key(OsRng).to_vec(),
            other => {
                return Err(CryptoError::UnsupportedKeyLength {
                    bits: usize::try_from(other).unwrap_or(usize::MAX),
                });
            }
        };
        Ok(Self(bytes))
    }

    /// Borrow the raw key bytes.
    ///
    /// Use with care: the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bits.
    #[must_use]
    pub fn bit_length(&self) -> usize {
        self.0.len().saturating_mul(8)
    }

    /// Short, non-reversible identifier for logs: the first 8 bytes of the
    /// SHA-256 of the key, hex encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0);
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bits", &self.bit_length())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypt plaintext using AES-GCM with a fresh random nonce.
///
/// Returns `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    match key.0.len() {
        16 => seal::<Aes128Gcm>(&key.0, plaintext),
        32 => seal::<Aes256Gcm>(&key.0, plaintext),
        n => Err(CryptoError::UnsupportedKeyLength {
            bits: n.saturating_mul(8),
        }),
    }
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] if the input is shorter than
/// 28 bytes (nonce + tag minimum).
///
/// Returns [`CryptoError::Decryption`] if authentication fails (wrong key,
/// corrupted data, or tampered tag).
pub fn decrypt(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_CIPHERTEXT_LEN,
            actual: combined.len(),
        });
    }

    match key.0.len() {
        16 => open::<Aes128Gcm>(&key.0, combined),
        32 => open::<Aes256Gcm>(&key.0, combined),
        n => Err(CryptoError::UnsupportedKeyLength {
            bits: n.saturating_mul(8),
        }),
    }
}

/// Derive a key of the same length as `root_key` using HKDF-SHA256.
///
/// The `info` string must be unique per use (e.g. one per file path).
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
pub fn derive_key(
    root_key: &EncryptionKey,
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<EncryptionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, root_key.as_bytes());
    let mut derived = vec![0u8; root_key.0.len()];
    hk.expand(info, &mut derived)
        .map_err(|e| CryptoError::KeyDerivation {
            context: String::from_utf8_lossy(info).into_owned(),
            reason: e.to_string(),
        })?;
    EncryptionKey::from_bytes(derived)
}

fn seal<C>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::Encryption {
        reason: e.to_string(),
    })?;
    let nonce = C::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    // nonce || ciphertext (includes tag appended by aes-gcm)
    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

fn open<C>(key: &[u8], combined: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: Aead + AeadCore + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|e| CryptoError::Decryption {
        reason: e.to_string(),
    })?;
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = aes_gcm::aead::Nonce::<C>::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}
