//! Rewinder - AEAD Encryption
//!
//! AES-256-GCM for full captures, XChaCha20-Poly1305 for thumbnails.
//! The capture timestamp is bound as associated data so a sealed blob
//! cannot be replayed under another key slot.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::keys::{generate_nonce, generate_xchacha_nonce, SealKey, NONCE_LEN, XCHACHA_NONCE_LEN};
use crate::error::EncryptionError;

/// Authentication tag length (both ciphers)
const TAG_LEN: usize = 16;

/// Encrypted data with nonce prepended
pub struct EncryptedData {
    /// Nonce (12 or 24 bytes depending on cipher)
    pub nonce: Vec<u8>,
    /// Ciphertext with authentication tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Serialize to bytes (nonce || ciphertext)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.nonce.len() + self.ciphertext.len());
        result.extend_from_slice(&self.nonce);
        result.extend_from_slice(&self.ciphertext);
        result
    }

    /// Deserialize from bytes (AES-GCM format)
    pub fn from_bytes_aes(data: &[u8]) -> Result<Self, EncryptionError> {
        Self::split(data, NONCE_LEN)
    }

    /// Deserialize from bytes (XChaCha20 format)
    pub fn from_bytes_xchacha(data: &[u8]) -> Result<Self, EncryptionError> {
        Self::split(data, XCHACHA_NONCE_LEN)
    }

    fn split(data: &[u8], nonce_len: usize) -> Result<Self, EncryptionError> {
        if data.len() < nonce_len + TAG_LEN {
            return Err(EncryptionError::DecryptFailed("Data too short".into()));
        }

        Ok(Self {
            nonce: data[..nonce_len].to_vec(),
            ciphertext: data[nonce_len..].to_vec(),
        })
    }
}

fn aad_for(timestamp: i64) -> [u8; 8] {
    timestamp.to_be_bytes()
}

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM (full captures)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt a capture with AES-256-GCM
pub fn encrypt_aes_gcm(key: &SealKey, timestamp: i64, plaintext: &[u8]) -> Result<EncryptedData, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| EncryptionError::EncryptFailed(e.to_string()))?;

    let nonce_bytes = generate_nonce();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let aad = aad_for(timestamp);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| EncryptionError::EncryptFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt a capture with AES-256-GCM
pub fn decrypt_aes_gcm(key: &SealKey, timestamp: i64, encrypted: &EncryptedData) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| EncryptionError::DecryptFailed(e.to_string()))?;

    if encrypted.nonce.len() != NONCE_LEN {
        return Err(EncryptionError::DecryptFailed("Invalid nonce length".into()));
    }

    let nonce = Nonce::from_slice(&encrypted.nonce);
    let aad = aad_for(timestamp);

    cipher
        .decrypt(nonce, Payload { msg: encrypted.ciphertext.as_slice(), aad: &aad })
        .map_err(|_| EncryptionError::DecryptFailed("Authentication failed".into()))
}

// ═══════════════════════════════════════════════════════════════════════════
// XChaCha20-Poly1305 (thumbnails - faster for small data)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt a thumbnail with XChaCha20-Poly1305
pub fn encrypt_xchacha(key: &SealKey, timestamp: i64, plaintext: &[u8]) -> Result<EncryptedData, EncryptionError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| EncryptionError::EncryptFailed(e.to_string()))?;

    let nonce_bytes = generate_xchacha_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);
    let aad = aad_for(timestamp);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad: &aad })
        .map_err(|e| EncryptionError::EncryptFailed(e.to_string()))?;

    Ok(EncryptedData {
        nonce: nonce_bytes.to_vec(),
        ciphertext,
    })
}

/// Decrypt a thumbnail with XChaCha20-Poly1305
pub fn decrypt_xchacha(key: &SealKey, timestamp: i64, encrypted: &EncryptedData) -> Result<Vec<u8>, EncryptionError> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| EncryptionError::DecryptFailed(e.to_string()))?;

    if encrypted.nonce.len() != XCHACHA_NONCE_LEN {
        return Err(EncryptionError::DecryptFailed("Invalid nonce length".into()));
    }

    let nonce = XNonce::from_slice(&encrypted.nonce);
    let aad = aad_for(timestamp);

    cipher
        .decrypt(nonce, Payload { msg: encrypted.ciphertext.as_slice(), aad: &aad })
        .map_err(|_| EncryptionError::DecryptFailed("Authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_gcm_roundtrip() {
        let key = SealKey::generate();
        let plaintext = b"\xFF\xD8\xFF jpeg bytes of a capture";

        let encrypted = encrypt_aes_gcm(&key, 42, plaintext).unwrap();
        let bytes = encrypted.to_bytes();
        let parsed = EncryptedData::from_bytes_aes(&bytes).unwrap();
        let decrypted = decrypt_aes_gcm(&key, 42, &parsed).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_xchacha_roundtrip() {
        let key = SealKey::generate();
        let plaintext = b"thumbnail";

        let encrypted = encrypt_xchacha(&key, 7, plaintext).unwrap();
        let decrypted = decrypt_xchacha(&key, 7, &encrypted).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = SealKey::generate();
        let key2 = SealKey::generate();

        let encrypted = encrypt_aes_gcm(&key1, 1, b"Secret data").unwrap();
        let result = decrypt_aes_gcm(&key2, 1, &encrypted);

        assert!(matches!(result, Err(EncryptionError::DecryptFailed(_))));
    }

    #[test]
    fn test_timestamp_is_authenticated() {
        let key = SealKey::generate();

        let encrypted = encrypt_aes_gcm(&key, 100, b"frame").unwrap();
        assert!(decrypt_aes_gcm(&key, 101, &encrypted).is_err());
    }

    #[test]
    fn test_truncated_blob_rejected() {
        assert!(EncryptedData::from_bytes_aes(&[0u8; 20]).is_err());
        assert!(EncryptedData::from_bytes_xchacha(&[0u8; 39]).is_err());
    }
}
