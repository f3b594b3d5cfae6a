//! Optional symmetric encryption of record files.
//!
//! Sealed layout: `MAGIC || nonce (12 bytes) || AES-256-GCM ciphertext`.
//! Every save shares one key; each write draws a fresh nonce.

use crate::codec::CodecError;
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};

const SEALED_MAGIC: &[u8; 8] = b"KSSEAL01";
const NONCE_LEN: usize = 12;

/// Shared key used to seal and open record files.
#[derive(Clone, PartialEq, Eq)]
pub struct SealKey {
    bytes: [u8; 32],
}

impl Default for SealKey {
    fn default() -> Self {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        Self { bytes }
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealKey(..)")
    }
}

impl SealKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    fn cipher(&self) -> Result<Aes256Gcm, CodecError> {
        Aes256Gcm::new_from_slice(&self.bytes).map_err(|_| CodecError::Seal)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CodecError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CodecError::Seal)?;

        let mut out = Vec::with_capacity(SEALED_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(SEALED_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, CodecError> {
        let body = sealed.strip_prefix(SEALED_MAGIC).ok_or(CodecError::Unseal)?;
        if body.len() < NONCE_LEN {
            return Err(CodecError::Truncated);
        }
        let (nonce, ciphertext) = body.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CodecError::Unseal)
    }
}
